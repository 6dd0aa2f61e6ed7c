//! Classification of attempt results.
//!
//! | result | class |
//! |---|---|
//! | 2xx | success |
//! | 408, 429, 5xx, timeout, reset/refused | recoverable |
//! | other 4xx (and anything else) | fatal |
//! | no connectivity | sender-wide suspension |
//! | cancelled | ignored |

use crate::TransportError;
use std::time::Duration;

/// Class of an HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Recoverable,
    Fatal,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        408 | 429 => StatusClass::Recoverable,
        500..=599 => StatusClass::Recoverable,
        _ => StatusClass::Fatal,
    }
}

/// What the sender does with the result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered { status: u16 },
    Fatal { status: u16 },
    Recoverable { reason: String },
    Offline { reason: String },
    Cancelled,
}

pub fn classify_transport_error(error: &TransportError) -> AttemptOutcome {
    match error {
        TransportError::NoConnectivity(reason) => AttemptOutcome::Offline {
            reason: reason.clone(),
        },
        TransportError::Cancelled => AttemptOutcome::Cancelled,
        TransportError::Timeout | TransportError::Other(_) => AttemptOutcome::Recoverable {
            reason: error.to_string(),
        },
    }
}

pub fn classify_attempt(result: &Result<u16, TransportError>) -> AttemptOutcome {
    match result {
        Ok(status) => match classify_status(*status) {
            StatusClass::Success => AttemptOutcome::Delivered { status: *status },
            StatusClass::Recoverable => AttemptOutcome::Recoverable {
                reason: format!("HTTP {}", status),
            },
            StatusClass::Fatal => AttemptOutcome::Fatal { status: *status },
        },
        Err(e) => classify_transport_error(e),
    }
}

/// Delay before the retry that follows `failed_attempts` recoverable
/// failures, or `None` once the intervals are exhausted.
pub fn retry_delay(intervals: &[Duration], failed_attempts: u32) -> Option<Duration> {
    let index = (failed_attempts as usize).checked_sub(1)?;
    intervals.get(index).copied()
}
