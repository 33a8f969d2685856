//! Persisted instance metadata.

use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::error::Error;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::Corrupt {
                        column: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Administrative switch. Inactive instances are skipped at boot.
    AdminState { Active => "active", Inactive => "inactive" }
}

string_enum! {
    /// Runtime lifecycle status.
    InstanceStatus {
        Created => "created",
        Booting => "booting",
        Waiting => "waiting",
        Available => "available",
        Deleted => "deleted",
    }
}

string_enum! {
    /// State of the protocol link.
    ConnectionStatus {
        Open => "open",
        Close => "close",
        Connecting => "connecting",
        Refused => "refused",
    }
}

/// Account details copied from the protocol session once connected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connection: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    #[serde(rename = "instanceId")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Only ever returned by the create call.
    #[serde(rename = "apikey", default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    pub state: AdminState,
    pub status: InstanceStatus,
    pub connection: ConnectionStatus,
    #[serde(rename = "whatsapp", default)]
    pub profile: AccountProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl InstanceRecord {
    /// Fresh record for a new instance: generated id and access key when not
    /// supplied, `waiting` / `close` runtime state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            external_id: None,
            access_key: Some(uuid::Uuid::new_v4().to_string().to_uppercase()),
            state: AdminState::Active,
            status: InstanceStatus::Waiting,
            connection: ConnectionStatus::Close,
            profile: AccountProfile::default(),
            container_name: None,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_access_key(mut self, key: impl Into<String>) -> Self {
        self.access_key = Some(key.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_state(mut self, state: AdminState) -> Self {
        self.state = state;
        self
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.profile.number = Some(number.into());
        self
    }

    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }

    /// Copy suitable for clients and broker payloads: the access key removed.
    pub fn redacted(&self) -> Self {
        Self {
            access_key: None,
            ..self.clone()
        }
    }

    pub fn number(&self) -> Option<&str> {
        self.profile.number.as_deref().filter(|n| !n.is_empty())
    }
}

/// Sparse update. `None` and empty strings leave the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstancePatch {
    pub name: Option<String>,
    pub number: Option<String>,
    pub last_connection: Option<DateTime<Utc>>,
    pub state: Option<AdminState>,
    pub status: Option<InstanceStatus>,
    pub connection: Option<ConnectionStatus>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl InstancePatch {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|v| !v.is_empty())
    }

    pub fn number(&self) -> Option<&str> {
        self.number.as_deref().filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.name().is_none()
            && self.number().is_none()
            && self.last_connection.is_none()
            && self.state.is_none()
            && self.status.is_none()
            && self.connection.is_none()
            && self.updated_at.is_none()
    }

    /// Apply to an in-memory record with the same sparse rules as the store.
    pub fn apply(&self, record: &mut InstanceRecord) {
        if let Some(name) = self.name() {
            record.name = name.to_string();
        }
        if let Some(number) = self.number() {
            record.profile.number = Some(number.to_string());
        }
        if let Some(last_connection) = self.last_connection {
            record.profile.last_connection = Some(last_connection);
        }
        if let Some(state) = self.state {
            record.state = state;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(connection) = self.connection {
            record.connection = connection;
        }
        if let Some(updated_at) = self.updated_at {
            record.updated_at = Some(updated_at);
        }
    }
}
