//! Restriction gate: out-of-band IMF verification for restricted accounts.
//!
//! A single process-wide code is held as a versioned setting. Verification is
//! a plain compare against whatever value is current; regeneration replaces
//! the value and bumps the version.

use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::account::Account;
use crate::engine::EngineError;
use crate::model::Time;

const CODE_PREFIX: &str = "IMF-";

/// A freshly issued code. Only the regenerate path ever sees one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedCode {
    pub code: String,
    pub version: u64,
    pub issued_at: Time,
}

/// Public view of the setting. Version 0 means no code was issued yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodeStatus {
    pub version: u64,
    pub updated_at: Option<Time>,
}

#[derive(Default)]
struct Setting {
    code: Option<String>,
    version: u64,
    updated_at: Option<Time>,
}

#[derive(Default)]
pub struct RestrictionGate {
    setting: RwLock<Setting>,
}

impl RestrictionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self, account: &Account) -> bool {
        account.is_restricted()
    }

    /// Whether a caller-supplied code matches the current setting.
    ///
    /// Accepts `8798`, `IMF-8798` or `imf-8798`.
    pub fn verify(&self, code: &str) -> bool {
        let candidate = normalize(code);
        let setting = self.setting.read();
        match &setting.code {
            Some(current) => !candidate.is_empty() && current.eq_ignore_ascii_case(&candidate),
            None => {
                warn!("restriction code checked before one was issued");
                false
            }
        }
    }

    /// Version and age of the current setting, without the code.
    pub fn status(&self) -> CodeStatus {
        let setting = self.setting.read();
        CodeStatus {
            version: setting.version,
            updated_at: setting.updated_at,
        }
    }

    /// Replace the code unconditionally.
    pub fn regenerate(&self) -> IssuedCode {
        let mut setting = self.setting.write();
        Self::issue(&mut setting)
    }

    /// Replace the code only if nobody else did since `expected_version`.
    pub fn regenerate_if(&self, expected_version: u64) -> Result<IssuedCode, EngineError> {
        let mut setting = self.setting.write();
        if setting.version != expected_version {
            warn!(
                expected = expected_version,
                current = setting.version,
                "restriction code regenerate lost a race"
            );
            return Err(EngineError::ConcurrencyConflict);
        }
        Ok(Self::issue(&mut setting))
    }

    fn issue(setting: &mut Setting) -> IssuedCode {
        let digits: u16 = rand::thread_rng().gen_range(1000..=9999);
        let code = format!("{CODE_PREFIX}{digits}");
        let now = Utc::now();
        setting.code = Some(code.clone());
        setting.version += 1;
        setting.updated_at = Some(now);
        info!(version = setting.version, "restriction code regenerated");
        IssuedCode {
            code,
            version: setting.version,
            issued_at: now,
        }
    }
}

fn normalize(code: &str) -> String {
    let upper = code.trim().to_ascii_uppercase();
    if upper.is_empty() || upper.starts_with(CODE_PREFIX) {
        upper
    } else {
        format!("{CODE_PREFIX}{upper}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_prefix_once() {
        assert_eq!(normalize("8798"), "IMF-8798");
        assert_eq!(normalize(" imf-8798 "), "IMF-8798");
        assert_eq!(normalize("IMF-8798"), "IMF-8798");
        assert_eq!(normalize("  "), "");
    }

    #[test]
    fn verify_before_issue_is_false() {
        let gate = RestrictionGate::new();
        assert!(!gate.verify("1234"));
        assert_eq!(
            gate.status(),
            CodeStatus {
                version: 0,
                updated_at: None
            }
        );
    }

    #[test]
    fn verify_accepts_every_spelling_of_current_code() {
        let gate = RestrictionGate::new();
        let issued = gate.regenerate();
        let digits = issued.code.trim_start_matches(CODE_PREFIX);

        assert!(gate.verify(&issued.code));
        assert!(gate.verify(digits));
        assert!(gate.verify(&issued.code.to_lowercase()));
        assert!(!gate.verify(""));
        assert!(!gate.verify("IMF-"));
    }

    #[test]
    fn issued_code_shape() {
        let gate = RestrictionGate::new();
        for _ in 0..100 {
            let issued = gate.regenerate();
            let digits = issued.code.strip_prefix(CODE_PREFIX).unwrap();
            assert_eq!(digits.len(), 4);
            assert!(digits.parse::<u16>().unwrap() >= 1000);
        }
    }

    #[test]
    fn regenerate_invalidates_previous_code() {
        let gate = RestrictionGate::new();
        let first = gate.regenerate();
        let mut second = gate.regenerate();
        // 1 in 9000 chance of drawing the same digits
        while second.code == first.code {
            second = gate.regenerate();
        }
        assert!(!gate.verify(&first.code));
        assert!(gate.verify(&second.code));
        assert!(second.version > first.version);
    }

    #[test]
    fn regenerate_if_is_compare_and_swap() {
        let gate = RestrictionGate::new();
        let first = gate.regenerate_if(0).unwrap();
        assert_eq!(first.version, 1);

        assert!(matches!(
            gate.regenerate_if(0),
            Err(EngineError::ConcurrencyConflict)
        ));
        assert!(gate.verify(&first.code));

        let second = gate.regenerate_if(1).unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(gate.status().version, 2);
        assert_eq!(gate.status().updated_at, Some(second.issued_at));
    }
}
