//! Serial client for the logger's SD card.
//!
//! The device speaks line-delimited ASCII commands; file contents come back
//! as a `SENDING:<name>:<size>` header, the raw bytes and an `END_OF_FILE`
//! sentinel. All traffic goes through one lock so a transfer can never
//! interleave with another request.

pub mod client;
pub mod protocol;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{Download, SdClient, SerialLink};
pub use protocol::{Command, FileEntry};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out waiting for {stage}")]
    Timeout { stage: &'static str },
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("serial i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("no logger serial port found")]
    NoPort,
    #[error("serial link lock poisoned")]
    LockPoisoned,
    #[error("invalid timeout for {0}")]
    InvalidTimeout(&'static str),
}

/// Bounds of each blocking wait, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportTimeouts {
    /// Reply to `LIST`, `HELP` and the delete commands.
    pub command_s: f64,
    /// `SENDING:` header after `GET`.
    pub header_s: f64,
    /// File contents.
    pub payload_s: f64,
    /// `END_OF_FILE` after a sized payload.
    pub sentinel_s: f64,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            command_s: 10.0,
            header_s: 5.0,
            payload_s: 30.0,
            sentinel_s: 2.0,
        }
    }
}

impl TransportTimeouts {
    pub fn validate(&self) -> Result<(), TransportError> {
        self.command()?;
        self.header()?;
        self.payload()?;
        self.sentinel()?;
        Ok(())
    }

    pub fn command(&self) -> Result<Duration, TransportError> {
        to_duration(self.command_s, "command reply")
    }

    pub fn header(&self) -> Result<Duration, TransportError> {
        to_duration(self.header_s, "header")
    }

    pub fn payload(&self) -> Result<Duration, TransportError> {
        to_duration(self.payload_s, "payload")
    }

    pub fn sentinel(&self) -> Result<Duration, TransportError> {
        to_duration(self.sentinel_s, "sentinel")
    }
}

fn to_duration(seconds: f64, stage: &'static str) -> Result<Duration, TransportError> {
    if seconds > 0.0 {
        Duration::try_from_secs_f64(seconds).map_err(|_| TransportError::InvalidTimeout(stage))
    } else {
        Err(TransportError::InvalidTimeout(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts_are_valid() {
        let timeouts = TransportTimeouts::default();
        timeouts.validate().unwrap();
        assert_eq!(timeouts.header().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn non_positive_timeouts_are_rejected() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let timeouts = TransportTimeouts {
                sentinel_s: bad,
                ..TransportTimeouts::default()
            };
            assert!(matches!(
                timeouts.validate(),
                Err(TransportError::InvalidTimeout("sentinel"))
            ));
        }
    }
}
