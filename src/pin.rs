//! PIN hashing.
//!
//! PINs are stored as `v1$<rounds>$<salt hex>$<digest hex>`: a random 16-byte
//! salt and an iterated SHA-256 over `salt || pin`. The plaintext never leaves
//! this module.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const VERSION: &str = "v1";
const SALT_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PinError {
    #[error("PIN must be 4 to 6 digits")]
    Format,
    #[error("stored PIN hash is malformed")]
    Corrupt,
}

/// One-way hash of an account PIN.
#[derive(Clone, PartialEq, Eq)]
pub struct PinHash {
    rounds: u32,
    salt: [u8; SALT_LEN],
    digest: [u8; 32],
}

impl PinHash {
    /// Hash a new PIN with a fresh random salt.
    pub fn new(pin: &str, rounds: u32) -> Result<Self, PinError> {
        validate(pin)?;
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let rounds = rounds.max(1);
        Ok(Self {
            rounds,
            salt,
            digest: stretch(&salt, pin, rounds),
        })
    }

    /// Check a candidate PIN. Malformed candidates simply fail.
    pub fn verify(&self, candidate: &str) -> bool {
        if validate(candidate).is_err() {
            return false;
        }
        let digest = stretch(&self.salt, candidate, self.rounds);
        constant_time_eq(&digest, &self.digest)
    }
}

impl fmt::Debug for PinHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PinHash(<redacted>)")
    }
}

impl fmt::Display for PinHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{VERSION}${}${}${}",
            self.rounds,
            hex::encode(self.salt),
            hex::encode(self.digest)
        )
    }
}

impl FromStr for PinHash {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('$');
        let (Some(VERSION), Some(rounds), Some(salt), Some(digest), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(PinError::Corrupt);
        };
        let rounds: u32 = rounds.parse().map_err(|_| PinError::Corrupt)?;
        let salt = hex::decode(salt).map_err(|_| PinError::Corrupt)?;
        let digest = hex::decode(digest).map_err(|_| PinError::Corrupt)?;
        Ok(Self {
            rounds,
            salt: salt.try_into().map_err(|_| PinError::Corrupt)?,
            digest: digest.try_into().map_err(|_| PinError::Corrupt)?,
        })
    }
}

fn validate(pin: &str) -> Result<(), PinError> {
    if (4..=6).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(PinError::Format)
    }
}

fn stretch(salt: &[u8], pin: &str, rounds: u32) -> [u8; 32] {
    let mut digest: [u8; 32] = Sha256::new()
        .chain_update(salt)
        .chain_update(pin.as_bytes())
        .finalize()
        .into();
    for _ in 1..rounds {
        digest = Sha256::new()
            .chain_update(salt)
            .chain_update(digest)
            .finalize()
            .into();
    }
    digest
}

fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
