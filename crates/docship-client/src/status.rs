//! Per-item status classification.

use std::collections::HashMap;

use docship_types::StatusClass;

/// Maps per-item HTTP statuses to outcome classes.
///
/// Defaults: `< 300` acked, `409` duplicate, `429` too-many, any other
/// `< 500` permanent, everything else retryable. Explicit overrides win.
#[derive(Debug, Clone, Default)]
pub struct StatusPolicy {
    overrides: HashMap<u16, StatusClass>,
}

impl StatusPolicy {
    /// Default table with `overrides` applied on top.
    pub fn with_overrides(overrides: HashMap<u16, StatusClass>) -> Self {
        Self { overrides }
    }

    pub fn classify(&self, status: u16) -> StatusClass {
        if let Some(class) = self.overrides.get(&status) {
            return *class;
        }
        match status {
            0..=299 => StatusClass::Acked,
            409 => StatusClass::Duplicate,
            429 => StatusClass::TooMany,
            300..=499 => StatusClass::Permanent,
            _ => StatusClass::Retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let policy = StatusPolicy::default();
        assert_eq!(policy.classify(200), StatusClass::Acked);
        assert_eq!(policy.classify(201), StatusClass::Acked);
        assert_eq!(policy.classify(409), StatusClass::Duplicate);
        assert_eq!(policy.classify(429), StatusClass::TooMany);
        assert_eq!(policy.classify(400), StatusClass::Permanent);
        assert_eq!(policy.classify(404), StatusClass::Permanent);
        assert_eq!(policy.classify(500), StatusClass::Retryable);
        assert_eq!(policy.classify(503), StatusClass::Retryable);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let policy = StatusPolicy::with_overrides(HashMap::from([
            (400, StatusClass::Retryable),
            (503, StatusClass::Permanent),
        ]));
        assert_eq!(policy.classify(400), StatusClass::Retryable);
        assert_eq!(policy.classify(503), StatusClass::Permanent);
        assert_eq!(policy.classify(404), StatusClass::Permanent);
    }
}
