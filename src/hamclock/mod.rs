// HamClock RESTful API client
// Moves the HamClock DX marker to the grid square of the station being worked.
// See the HamClock user guide, "RESTful commands": GET /set_newdx?grid=XXnn

use std::time::Duration;

use reqwest::blocking::Client;
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HamClock request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HamClock returned HTTP {0}")]
    Status(u16),
}

/// One-shot "set current DX location" notification.
pub trait DxNotifier: Send {
    fn set_new_dx(&self, grid: &str) -> Result<(), NotifyError>;
}

pub struct HamclockClient {
    http: Client,
    base_url: String,
}

impl HamclockClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, NotifyError> {
        Self::new(&config.hamclock_api, config.http_timeout())
    }

    pub fn set_newdx_url(&self) -> String {
        format!("{}/set_newdx", self.base_url)
    }
}

impl DxNotifier for HamclockClient {
    fn set_new_dx(&self, grid: &str) -> Result<(), NotifyError> {
        log::info!("Sending DX grid {} to HamClock at {}", grid, self.base_url);

        let response = self
            .http
            .get(self.set_newdx_url())
            .query(&[("grid", grid)])
            .send()?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
