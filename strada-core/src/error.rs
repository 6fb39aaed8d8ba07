/// Error taxonomy shared across the engine.
///
/// Business outcomes ("no drivers in area", "nobody accepted") are not errors;
/// they live on `DispatchOutcome`. These variants cover caller mistakes and
/// infrastructure faults only.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Malformed input. Rejected immediately, never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A state-transition guard failed, e.g. accepting an already-expired
    /// request. Surfaced to the caller, never auto-retried.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Persistence temporarily unavailable. A dispatch attempt hitting this
    /// is abandoned (it still counts toward the attempt cap) rather than
    /// silently retried.
    #[error("store unavailable: {0}")]
    Store(String),
}

impl DispatchError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, DispatchError::Conflict(_))
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        DispatchError::NotFound(what.to_string())
    }
}
