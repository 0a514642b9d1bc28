use serde::{Deserialize, Serialize};

/// What happened to the best-effort persistence side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistenceOutcome {
    /// Nothing to persist (cache hit, empty batch, failed evaluation).
    Skipped,
    Saved { records: usize },
    /// The store answered but is not available.
    Unavailable,
    Failed { reason: String },
}

/// Primary workflow result plus the provenance and side-effect outcome.
///
/// Callers always receive `value`; `persistence` is informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generated<T> {
    pub value: T,
    pub from_cache: bool,
    pub persistence: PersistenceOutcome,
}

impl<T> Generated<T> {
    #[must_use]
    pub fn cached(value: T) -> Self {
        Self {
            value,
            from_cache: true,
            persistence: PersistenceOutcome::Skipped,
        }
    }

    #[must_use]
    pub fn fresh(value: T, persistence: PersistenceOutcome) -> Self {
        Self {
            value,
            from_cache: false,
            persistence,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}
