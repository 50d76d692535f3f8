//! Account numbers and transaction references.

use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::EngineError;

const REFERENCE_PREFIX: &str = "TXN-";
const SUFFIX_LEN: usize = 6;
const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Produces unique account numbers and transaction references.
///
/// References are `TXN-` followed by a base-36 tick and a 6 character random
/// suffix. The tick is wall-clock milliseconds but never repeats within one
/// generator, so references from the same generator cannot collide.
pub struct ReferenceGenerator {
    inner: Mutex<Inner>,
}

struct Inner {
    rng: StdRng,
    last_tick: u64,
}

impl ReferenceGenerator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic generator, mostly for tests.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            inner: Mutex::new(Inner { rng, last_tick: 0 }),
        }
    }

    /// An 8-digit number not reported as taken by `exists`.
    pub fn new_account_number(
        &self,
        attempts: u32,
        exists: impl Fn(&str) -> bool,
    ) -> Result<String, EngineError> {
        let mut inner = self.inner.lock();
        for _ in 0..attempts {
            let candidate = inner.rng.gen_range(10_000_000u32..=99_999_999).to_string();
            if !exists(&candidate) {
                return Ok(candidate);
            }
        }
        Err(EngineError::GenerationExhausted {
            what: "account number",
            attempts,
        })
    }

    /// A reference not reported as taken by `exists`.
    pub fn new_transaction_reference(
        &self,
        attempts: u32,
        exists: impl Fn(&str) -> bool,
    ) -> Result<String, EngineError> {
        for _ in 0..attempts {
            let candidate = self.next_reference();
            if !exists(&candidate) {
                return Ok(candidate);
            }
        }
        Err(EngineError::GenerationExhausted {
            what: "transaction reference",
            attempts,
        })
    }

    fn next_reference(&self) -> String {
        let mut inner = self.inner.lock();
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let tick = now.max(inner.last_tick + 1);
        inner.last_tick = tick;

        let mut reference = String::with_capacity(REFERENCE_PREFIX.len() + 9 + SUFFIX_LEN);
        reference.push_str(REFERENCE_PREFIX);
        reference.push_str(&to_base36(tick));
        for _ in 0..SUFFIX_LEN {
            let idx = inner.rng.gen_range(0..BASE36.len());
            reference.push(BASE36[idx] as char);
        }
        reference
    }
}

impl Default for ReferenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    // only ASCII digits and letters were pushed
    digits.into_iter().map(char::from).collect()
}
