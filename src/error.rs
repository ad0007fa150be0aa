use derive_more::{Display, Error};

/// Everything that can go wrong in this crate.
///
/// All failures are surfaced synchronously to the immediate caller; nothing
/// retries or silently recovers. Operations validate before mutating, so a
/// returned error means no buffer was partially updated.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum Error {
    /// Tensor dimensions disagree with the current topology or batch size.
    #[display("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// An activation name outside the supported set.
    #[display("unknown activation {name:?} (supported: relu, tanh, linear)")]
    UnknownActivation { name: String },

    /// Persisted parameters are missing fields or internally inconsistent.
    #[display("malformed saved parameters: {reason}")]
    MalformedPersistedState { reason: String },
}

impl Error {
    pub(crate) fn shape_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPersistedState {
            reason: reason.into(),
        }
    }
}
