pub mod client; // QRZ XML callsign lookups

use serde::Serialize;

pub use client::{parse_lookup_response, LookupError, QrzClient, QrzCredentials};

/// What is known about a station after a lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LookupResult {
    pub grid: Option<String>,
    /// First and last name joined with a space
    pub operator_name: Option<String>,
    pub country: Option<String>,
}

/// A blocking callsign lookup service.
///
/// Called from the receive worker, one request at a time.
pub trait CallsignLookup: Send {
    fn lookup(&self, callsign: &str) -> Result<LookupResult, LookupError>;
}
