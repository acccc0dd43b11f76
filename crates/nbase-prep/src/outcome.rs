//! Success-or-degraded result of a preparation stage.

use serde::Serialize;

/// A stage either produced its payload or degraded with a human-readable
/// reason. A degraded ASE stage means "continue with the count-only model".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome<T> {
    Success(T),
    Degraded(String),
}

impl<T> Outcome<T> {
    pub fn degraded(reason: impl Into<String>) -> Self {
        Outcome::Degraded(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Degraded(r) => Some(r),
        }
    }

    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(v) => Some(v),
            Outcome::Degraded(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_carries_reason_only() {
        let ok: Outcome<u32> = Outcome::Success(2);
        assert!(ok.is_success());
        assert_eq!(ok.reason(), None);
        assert_eq!(ok.success(), Some(2));

        let bad: Outcome<u32> = Outcome::degraded("no fSNPs usable for ASE");
        assert!(!bad.is_success());
        assert_eq!(bad.reason(), Some("no fSNPs usable for ASE"));
        assert_eq!(bad.success(), None);
    }
}
