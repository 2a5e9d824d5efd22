//! In-memory audit trail of authentication state transitions.
//!
//! A fixed-capacity ring buffer: the oldest event is evicted when full. It is
//! a diagnostic aid, not a source of truth. Every event is also emitted
//! through `tracing`.
//!
//! ## Redaction
//!
//! Event data is a string map. Before an event is stored:
//! - values under [`REDACTED_KEYS`] are replaced with a short fingerprint
//!   (first 4 characters and the length), never the full secret
//! - values under [`ADDRESS_KEYS`] are truncated to `0x1234…abcd`

use crate::auth::address::truncate_address;
use crate::auth::clock::Clock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Keys whose values are never stored verbatim.
pub const REDACTED_KEYS: &[&str] = &[
    "signature",
    "nonce",
    "token",
    "session_token",
    "app_token",
    "pin",
    "pin_hash",
    "message",
];

/// Keys whose values are account addresses and get truncated.
pub const ADDRESS_KEYS: &[&str] = &["address", "wallet", "signer", "claimed"];

/// Open key-value payload attached to an event.
pub type AuditData = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: u64,
    pub event: String,
    pub timestamp: u64,
    pub data: AuditData,
}

/// Bounded append-only event log.
#[derive(Debug)]
pub struct AuditLog {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    /// Append an event, redacting sensitive values first.
    pub fn record<I, K, V>(&self, event: &str, data: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let data: AuditData = data
            .into_iter()
            .map(|(k, v)| {
                let key = k.into();
                let value = redact_value(&key, v.into());
                (key, value)
            })
            .collect();

        let failed = data.contains_key("step");
        if failed {
            tracing::warn!(action = %event, data = ?data, "Auth event");
        } else {
            tracing::info!(action = %event, data = ?data, "Auth event");
        }

        let entry = AuditEvent {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            event: event.to_string(),
            timestamp: self.clock.now_secs(),
            data,
        };

        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(entry);
    }

    /// Most recent events, newest last, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    /// Number of events currently held.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn redact_value(key: &str, value: String) -> String {
    if REDACTED_KEYS.contains(&key) {
        let prefix: String = value.chars().take(4).collect();
        format!("{}…({} chars)", prefix, value.chars().count())
    } else if ADDRESS_KEYS.contains(&key) {
        truncate_address(&value)
    } else {
        value
    }
}
