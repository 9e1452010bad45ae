// QRZ XML Client
// Looks up grid, operator name and country for a callsign.
// See: https://www.qrz.com/docs/xml/current_spec.html
//
// Only the Callsign fields this application displays are extracted; the
// response is scanned for tags rather than parsed as a full document.

use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use thiserror::Error;

use super::{CallsignLookup, LookupResult};
use crate::config::Config;

/// QRZ XML endpoint
pub const QRZ_XML_URL: &str = "https://xmldata.qrz.com/xml/current/";

/// Error types for callsign lookups
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("lookup service returned HTTP {0}")]
    Status(u16),

    #[error("lookup service error: {0}")]
    Service(String),
}

/// QRZ credentials for API access
#[derive(Clone)]
pub struct QrzCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for QrzCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QrzCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// QRZ XML API client
pub struct QrzClient {
    http: Client,
    url: String,
    credentials: QrzCredentials,
}

impl QrzClient {
    /// Create a new QRZ client with credentials
    pub fn new(
        url: impl Into<String>,
        credentials: QrzCredentials,
        timeout: Duration,
    ) -> Result<Self, LookupError> {
        let http = Client::builder()
            .user_agent(concat!("wsjt2hamclock/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
            credentials,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, LookupError> {
        Self::new(
            config.qrz_url.clone(),
            QrzCredentials {
                username: config.qrz_username.clone(),
                password: config.qrz_password.clone(),
            },
            config.http_timeout(),
        )
    }
}

impl CallsignLookup for QrzClient {
    fn lookup(&self, callsign: &str) -> Result<LookupResult, LookupError> {
        log::info!("Looking up callsign {} (user {})", callsign, self.credentials.username);

        let response = self
            .http
            .get(&self.url)
            .query(&[
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
                ("callsign", callsign),
            ])
            .send()
            // The request URL carries the password
            .map_err(|e| LookupError::Http(e.without_url()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(LookupError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .map_err(|e| LookupError::Http(e.without_url()))?;
        log::debug!("QRZ response size: {} bytes", body.len());

        let result = parse_lookup_response(&body)?;
        log::info!(
            "QRZ {}: grid={:?} operator={:?} country={:?}",
            callsign,
            result.grid,
            result.operator_name,
            result.country
        );
        Ok(result)
    }
}

/// Pull the displayed fields out of a QRZ XML response body.
pub fn parse_lookup_response(body: &str) -> Result<LookupResult, LookupError> {
    let grid = extract_tag_value(body, "grid");
    let fname = extract_tag_value(body, "fname").unwrap_or_default();
    let name = extract_tag_value(body, "name").unwrap_or_default();
    let country = extract_tag_value(body, "country");

    let operator = format!("{} {}", fname, name).trim().to_string();
    let operator_name = if operator.is_empty() { None } else { Some(operator) };

    if grid.is_none() && operator_name.is_none() && country.is_none() {
        if let Some(error) = extract_tag_value(body, "Error") {
            return Err(LookupError::Service(error));
        }
    }

    Ok(LookupResult {
        grid,
        operator_name,
        country,
    })
}

/// Text of the first `<tag>...</tag>` element, trimmed. Empty text is `None`.
fn extract_tag_value(xml: &str, tag: &str) -> Option<String> {
    let start_tag = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);

    let start = xml.find(&start_tag)? + start_tag.len();
    let len = xml[start..].find(&end_tag)?;
    let value = xml[start..start + len].trim();

    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
