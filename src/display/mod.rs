//! Display sink
//!
//! The receive worker hands finished rows across a thread boundary; the
//! front end only ever reads them. Rows arrive in datagram order.

pub mod format;

use std::collections::VecDeque;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::qrz::LookupResult;
use crate::udp::{DecodeFailure, DecodedMessage};
use format::{format_frequency_mhz, format_utc_time, or_missing, MISSING};

/// Rows kept by the front end
pub const DEFAULT_HISTORY_ROWS: usize = 100;

/// Column headings, in `DisplayRow::columns` order
pub const COLUMNS: [&str; 7] = ["UTC", "Type", "DX Call", "Grid", "Operator", "Country", "Frequency"];

/// One line of the event table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayRow {
    pub received_at: DateTime<Utc>,
    pub message_type: String,
    pub dx_call: Option<String>,
    pub grid: Option<String>,
    pub operator: Option<String>,
    pub country: Option<String>,
    pub dial_frequency_hz: Option<u64>,
    /// Set on degraded rows
    pub error: Option<String>,
    pub raw_hex: Option<String>,
}

impl DisplayRow {
    /// Row for a STATUS message whose DX call was looked up
    pub fn from_lookup(msg: &DecodedMessage, dx_call: &str, lookup: LookupResult) -> Self {
        Self {
            received_at: msg.received_at,
            message_type: msg.message_type.to_string(),
            dx_call: Some(dx_call.to_string()),
            grid: lookup.grid,
            operator: lookup.operator_name,
            country: lookup.country,
            dial_frequency_hz: msg.status().map(|s| s.dial_frequency_hz),
            error: None,
            raw_hex: None,
        }
    }

    /// Degraded row for a datagram that failed to decode
    pub fn from_failure(failure: &DecodeFailure) -> Self {
        Self {
            received_at: failure.received_at,
            message_type: failure
                .message_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "ERROR".to_string()),
            dx_call: None,
            grid: None,
            operator: None,
            country: None,
            dial_frequency_hz: None,
            error: Some(failure.to_string()),
            raw_hex: Some(failure.raw_hex.clone()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }

    pub fn utc_time(&self) -> String {
        format_utc_time(&self.received_at)
    }

    pub fn frequency_mhz(&self) -> String {
        self.dial_frequency_hz
            .map(format_frequency_mhz)
            .unwrap_or_else(|| MISSING.to_string())
    }

    pub fn columns(&self) -> [String; 7] {
        [
            self.utc_time(),
            self.message_type.clone(),
            or_missing(self.dx_call.as_deref()),
            or_missing(self.grid.as_deref()),
            or_missing(self.operator.as_deref()),
            or_missing(self.country.as_deref()),
            self.frequency_mhz(),
        ]
    }
}

/// Events sent from the receive worker to the front end
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Connected { group: Ipv4Addr, port: u16 },
    Row(DisplayRow),
    /// Fatal receive error; reported once, then the worker stops
    Error(String),
    Disconnected,
}

/// Consumer of monitor events
pub trait DisplaySink: Send {
    fn deliver(&mut self, event: MonitorEvent);
}

impl DisplaySink for mpsc::UnboundedSender<MonitorEvent> {
    fn deliver(&mut self, event: MonitorEvent) {
        // Receiver gone means the front end is shutting down
        let _ = self.send(event);
    }
}

/// Most recent rows, newest first
#[derive(Debug, Clone)]
pub struct RowHistory {
    rows: VecDeque<DisplayRow>,
    capacity: usize,
}

impl Default for RowHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_ROWS)
    }
}

impl RowHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, row: DisplayRow) {
        self.rows.push_front(row);
        self.rows.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn latest(&self) -> Option<&DisplayRow> {
        self.rows.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DisplayRow> {
        self.rows.iter()
    }
}
