//! Error taxonomy shared by every stage of the rig.

/// Errors reported by the imaging pipeline and the controllers.
///
/// The type is `Clone` so that controller workers can publish the cause of an
/// aborted session on their event channel and also hand it back to callers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RigError {
    /// Out-of-range configuration, rejected at the setter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Frame too small or pathological for the segmentation math.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),
    /// Non-positive or non-finite quality reading during autofocus.
    #[error("unreliable signal: {0}")]
    UnreliableSignal(String),
    /// An expected asynchronous signal did not arrive in time.
    #[error("timeout: {0}")]
    Timeout(String),
    /// Rejected because a conflicting session or cycle is active.
    #[error("busy: {0}")]
    Busy(String),
    /// A hardware collaborator failed.
    #[error("device error: {0}")]
    Device(String),
    /// Configuration file could not be read, parsed or written.
    #[error("configuration error: {0}")]
    Config(String),
    /// The peer of a channel went away.
    #[error("closed: {0}")]
    Closed(String),
}

impl RigError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn degenerate_input(message: impl Into<String>) -> Self {
        Self::DegenerateInput(message.into())
    }

    pub fn unreliable_signal(message: impl Into<String>) -> Self {
        Self::UnreliableSignal(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy(message.into())
    }

    pub fn device(message: impl Into<String>) -> Self {
        Self::Device(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::Closed(message.into())
    }
}

impl<T> From<std::sync::PoisonError<T>> for RigError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::Device("lock poisoned by previous panic".to_string())
    }
}
