//! HTTP retrieval of media and link targets.
//!
//! Every hop of a download is resolved and refused when it lands on a
//! loopback, private or link-local address. Redirects are followed by hand
//! so each target goes through that check.

use std::{net::IpAddr, time::Duration};

use {
    bytes::Bytes,
    reqwest::{
        Response,
        header::{CONTENT_TYPE, LOCATION},
        redirect::Policy,
    },
    tracing::debug,
    url::Url,
};

use crate::error::{Context, Error, Result};

const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_MAX_REDIRECTS: u8 = 3;

/// A fetched body with the content type the server reported.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Bytes,
    pub content_type: Option<String>,
}

#[derive(Clone)]
pub struct Fetcher {
    http: reqwest::Client,
    max_bytes: usize,
    max_redirects: u8,
    allow_private_hosts: bool,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .user_agent(concat!("chatgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            max_bytes: DEFAULT_MAX_BYTES,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            allow_private_hosts: false,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: u8) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Skip the private-address check. Meant for local deployments and
    /// tests against a loopback server.
    pub fn with_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    /// GET `url` and return the body. Non-2xx answers, blocked hosts and
    /// bodies over the size cap are errors.
    pub async fn get(&self, url: &str) -> Result<Fetched> {
        let mut current = parse_http_url(url)?;
        let mut visited: Vec<Url> = Vec::new();
        let mut hops = 0u8;

        loop {
            if !self.allow_private_hosts {
                ssrf_check(&current).await?;
            }
            visited.push(current.clone());

            let resp = self
                .http
                .get(current.clone())
                .send()
                .await
                .map_err(|source| Error::Fetch {
                    url: current.to_string(),
                    source,
                })?;
            let status = resp.status();

            if status.is_redirection() {
                if hops >= self.max_redirects {
                    return Err(Error::validation(format!(
                        "too many redirects fetching {url} (max {})",
                        self.max_redirects
                    )));
                }
                let location = resp
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        Error::validation(format!("redirect without Location header from {current}"))
                    })?;
                let next = current
                    .join(location)
                    .map_err(|e| Error::validation(format!("invalid redirect target '{location}': {e}")))?;
                let next = parse_http_url(next.as_str())?;
                if visited.contains(&next) {
                    return Err(Error::validation(format!(
                        "redirect loop detected: {current} -> {next}"
                    )));
                }
                current = next;
                hops += 1;
                continue;
            }

            if !status.is_success() {
                return Err(Error::FetchStatus {
                    url: current.to_string(),
                    status: status.as_u16(),
                });
            }

            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = self.read_body(&current, resp).await?;
            debug!(url = %current, bytes = body.len(), content_type = ?content_type, "fetched");

            return Ok(Fetched { body, content_type });
        }
    }

    async fn read_body(&self, url: &Url, mut resp: Response) -> Result<Bytes> {
        let too_large = || Error::TooLarge {
            url: url.to_string(),
            limit: self.max_bytes,
        };
        if resp
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|source| Error::Fetch {
            url: url.to_string(),
            source,
        })? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(body))
    }
}

fn parse_http_url(url: &str) -> Result<Url> {
    let parsed =
        Url::parse(url).map_err(|e| Error::validation(format!("invalid url '{url}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        s => Err(Error::validation(format!("unsupported URL scheme: {s}"))),
    }
}

/// Resolve the URL host and refuse private, loopback and link-local
/// addresses.
async fn ssrf_check(url: &Url) -> Result<()> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::validation(format!("url has no host: {url}")))?;
    let bare = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_private_ip(&ip) {
            return Err(Error::Blocked {
                host: host.to_string(),
                ip,
            });
        }
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(443);
    let addrs: Vec<_> = tokio::net::lookup_host((bare, port))
        .await
        .map_err(|e| Error::validation(format!("failed to resolve {host}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::validation(format!("DNS resolution failed for {host}")));
    }
    if let Some(addr) = addrs.iter().find(|a| is_private_ip(&a.ip())) {
        return Err(Error::Blocked {
            host: host.to_string(),
            ip: addr.ip(),
        });
    }
    Ok(())
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10
                || (a == 100 && (b & 0xC0) == 64)
                // 192.0.0.0/24
                || (a == 192 && b == 0 && c == 0)
        },
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(v4));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                // fe80::/10
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
        },
    }
}

/// Mimetype guess from a file name or URL path, for servers that send none.
pub fn guess_mimetype(path: &str) -> &'static str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "3gp" => "video/3gpp",
        "mp3" => "audio/mpeg",
        "ogg" | "opus" => "audio/ogg; codecs=opus",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
