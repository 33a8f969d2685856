//! Protocol addressing: `user@server` identifiers and recipient
//! normalisation.

use std::{fmt, str::FromStr, sync::LazyLock};

use {
    regex::Regex,
    serde::{Deserialize, Deserializer, Serialize, Serializer},
};

use crate::error::{Error, Result};

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// Country code, area code, the spurious extra digit, then the 8-digit
/// subscriber number.
#[allow(clippy::unwrap_used)]
static BR_MOBILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2})(\d{2})\d(\d{8})$").unwrap());

/// A fully qualified protocol address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    user: String,
    server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    /// Individual account address for a phone number.
    pub fn user(number: impl Into<String>) -> Self {
        Self::new(number, USER_SERVER)
    }

    pub fn user_part(&self) -> &str {
        &self.user
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Account number without the `:device` suffix multi-device ids carry.
    pub fn number(&self) -> &str {
        self.user.split(':').next().unwrap_or(&self.user)
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_status_broadcast(&self) -> bool {
        self.user == "status" && self.server == BROADCAST_SERVER
    }

    /// The empty address, used where the protocol expects "self".
    pub fn empty() -> Self {
        Self::new("", "")
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.server.is_empty()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        if self.user.is_empty() {
            return f.write_str(&self.server);
        }
        write!(f, "{}@{}", self.user, self.server)
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::empty());
        }
        match s.split_once('@') {
            Some((user, server)) if !server.is_empty() && !server.contains('@') => {
                Ok(Self::new(user, server))
            },
            Some(_) => Err(Error::invalid_jid(s, "malformed server part")),
            None => Ok(Self::new("", s)),
        }
    }
}

impl Serialize for Jid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Jid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Drop the extra ninth digit from Brazilian mobile numbers when the area
/// code and leading subscriber digit say it is not part of the number.
///
/// Numbers outside the `55 AA X NNNNNNNN` shape are returned unchanged.
pub fn formatted_br_number(number: &str) -> String {
    let Some(caps) = BR_MOBILE.captures(number) else {
        return number.to_string();
    };
    if &caps[1] != "55" {
        return number.to_string();
    }

    let area: u32 = caps[2].parse().unwrap_or_default();
    let leading = caps[3]
        .chars()
        .next()
        .and_then(|c| c.to_digit(10))
        .unwrap_or_default();

    if leading < 7 || area < 31 {
        return number.to_string();
    }
    format!("{}{}{}", &caps[1], &caps[2], &caps[3])
}

/// Turn a caller-supplied recipient into a protocol address.
///
/// Qualified addresses (anything with `@`) pass through unchanged, bare
/// group ids (`<creator>-<timestamp>`) get the group server, and phone
/// numbers are stripped of formatting and run through
/// [`formatted_br_number`].
pub fn format_jid(recipient: &str) -> Result<Jid> {
    let recipient = recipient.trim();
    if recipient.is_empty() {
        return Err(Error::invalid_jid(recipient, "recipient is empty"));
    }
    if recipient.contains('@') {
        return recipient.parse();
    }
    if recipient.contains('-') {
        return Ok(Jid::new(recipient, GROUP_SERVER));
    }

    let digits: String = recipient
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '(' | ')' | '.'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::invalid_jid(recipient, "not a phone number"));
    }
    Ok(Jid::user(formatted_br_number(&digits)))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("5531987654321", "553187654321")] // area 31, leading 8
    #[case("5531970000000", "553170000000")] // area 31, leading 7
    #[case("5599987654321", "559987654321")]
    #[case("5530987654321", "5530987654321")] // area 30 keeps the digit
    #[case("5511987654321", "5511987654321")] // area 11 keeps the digit
    #[case("5531961234567", "5531961234567")] // leading 6 keeps the digit
    #[case("4431987654321", "4431987654321")] // not Brazil
    #[case("553187654321", "553187654321")] // already 12 digits
    fn br_heuristic(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(formatted_br_number(input), expected);
    }

    #[rstest]
    #[case("5531987654321@s.whatsapp.net")]
    #[case("120363025246125486@g.us")]
    #[case("status@broadcast")]
    #[case("5531987654321:12@s.whatsapp.net")]
    fn qualified_addresses_pass_through(#[case] input: &str) {
        assert_eq!(format_jid(input).unwrap().to_string(), input);
    }

    #[test]
    fn bare_group_id_gets_group_server() {
        let jid = format_jid("553199999999-1610000000").unwrap();
        assert_eq!(jid.to_string(), "553199999999-1610000000@g.us");
        assert!(jid.is_group());
    }

    #[test]
    fn phone_numbers_are_cleaned_and_normalised() {
        let jid = format_jid("+55 (31) 987654321").unwrap();
        assert_eq!(jid.to_string(), "553187654321@s.whatsapp.net");
        assert_eq!(
            format_jid("14155550100").unwrap().to_string(),
            "14155550100@s.whatsapp.net"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(format_jid("").is_err());
        assert!(format_jid("hello").is_err());
        assert!(format_jid("a@b@c").is_err());
    }

    #[test]
    fn number_strips_device_suffix() {
        let jid: Jid = "553187654321:7@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.number(), "553187654321");
    }

    #[test]
    fn serde_uses_string_form() {
        let jid = Jid::user("123");
        let json = serde_json::to_string(&jid).unwrap();
        assert_eq!(json, "\"123@s.whatsapp.net\"");
        let back: Jid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, jid);
        assert!(STATUS_BROADCAST.parse::<Jid>().unwrap().is_status_broadcast());
    }
}
