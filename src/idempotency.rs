//! Deduplication of retried mutating requests.
//!
//! A caller-supplied key is claimed before an operation commits. Keys are
//! scoped by the caller that acts (the account holder, or the admin for an
//! adjustment), so two callers never collide on the same key. The claim
//! remembers the request fingerprint; completing it stores the receipt so a
//! later retry gets the same answer instead of a second mutation.
//!
//! Completed keys are kept up to a fixed retention; past it the oldest
//! completed key is forgotten and may be claimed afresh.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::engine::{EngineError, ValidationError};
use crate::model::Receipt;

const MAX_KEY_LEN: usize = 128;

/// Client-chosen token identifying one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        let trimmed = key.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_KEY_LEN {
            return Err(ValidationError::IdempotencyKey);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A key as seen by one caller.
type ScopedKey = (Uuid, IdempotencyKey);

enum Slot {
    InFlight { fingerprint: String },
    Done { fingerprint: String, receipt: Receipt },
}

#[derive(Default)]
struct Slots {
    by_key: HashMap<ScopedKey, Slot>,
    /// Completed keys, oldest first.
    completed: VecDeque<ScopedKey>,
}

/// Result of claiming a key.
pub enum Claim<'a> {
    /// First time this key is seen; run the operation and complete the guard.
    Fresh(ClaimGuard<'a>),
    /// Already committed; hand back the original receipt.
    Replay(Receipt),
}

pub struct IdempotencyTable {
    slots: Mutex<Slots>,
    retention: usize,
}

impl IdempotencyTable {
    /// A table remembering at most `retention` completed keys.
    pub fn new(retention: usize) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            retention: retention.max(1),
        }
    }

    /// Claim `key` on behalf of `caller` for the request described by
    /// `fingerprint`.
    ///
    /// With no key every call is `Fresh` and nothing is recorded.
    pub fn claim(
        &self,
        caller: Uuid,
        key: Option<&IdempotencyKey>,
        fingerprint: String,
    ) -> Result<Claim<'_>, EngineError> {
        let Some(key) = key else {
            return Ok(Claim::Fresh(ClaimGuard {
                table: self,
                key: None,
            }));
        };

        let scoped = (caller, key.clone());
        let mut slots = self.slots.lock();
        match slots.by_key.get(&scoped) {
            Some(Slot::Done {
                fingerprint: seen,
                receipt,
            }) => {
                if *seen == fingerprint {
                    Ok(Claim::Replay(receipt.clone()))
                } else {
                    Err(ValidationError::IdempotencyKeyReused.into())
                }
            }
            Some(Slot::InFlight { fingerprint: seen }) => {
                if *seen == fingerprint {
                    Err(EngineError::ConcurrencyConflict)
                } else {
                    Err(ValidationError::IdempotencyKeyReused.into())
                }
            }
            None => {
                slots
                    .by_key
                    .insert(scoped.clone(), Slot::InFlight { fingerprint });
                Ok(Claim::Fresh(ClaimGuard {
                    table: self,
                    key: Some(scoped),
                }))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-flight claim. Dropping it without [`complete`](Self::complete) releases
/// the key so the caller may retry.
pub struct ClaimGuard<'a> {
    table: &'a IdempotencyTable,
    key: Option<ScopedKey>,
}

impl ClaimGuard<'_> {
    pub fn complete(mut self, receipt: &Receipt) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut slots = self.table.slots.lock();
        let Some(Slot::InFlight { fingerprint }) = slots.by_key.remove(&key) else {
            return;
        };
        slots.by_key.insert(
            key.clone(),
            Slot::Done {
                fingerprint,
                receipt: receipt.clone(),
            },
        );
        slots.completed.push_back(key);
        while slots.completed.len() > self.table.retention {
            let Some(oldest) = slots.completed.pop_front() else {
                break;
            };
            if matches!(slots.by_key.get(&oldest), Some(Slot::Done { .. })) {
                slots.by_key.remove(&oldest);
            }
        }
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.table.slots.lock().by_key.remove(&key);
        }
    }
}
