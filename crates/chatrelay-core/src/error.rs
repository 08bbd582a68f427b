use thiserror::Error;

/// A convenience `Result` alias using [`RelayError`].
pub type RelayResult<T> = Result<T, RelayError>;

/// Top-level error type for chatrelay.
///
/// The first group of variants is raised by session transitions and the
/// repository; each is scoped to a single chat and never fatal to the process.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Empty prompt or reply text.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Concurrent mutation or duplicate creation; the caller may reload and retry.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A reply arrived while no exchange was in flight.
    #[error("There is no ongoing conversation")]
    NoActiveExchange,

    /// The current exchange already carries a reply.
    #[error("Current prompt has already been replied")]
    AlreadyReplied,

    /// The chat has ended and accepts no new exchanges.
    #[error("The chat has ended, start a new one")]
    Terminated,

    /// No active or known chat.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Opaque failure from the session store.
    #[error("Store error: {0}")]
    Store(String),

    /// An error from an outbound HTTP request (e.g. completion API call).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The completion service answered with something unusable.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// A bounded operation exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A channel notifier failed to deliver.
    #[error("Channel error: {0}")]
    Channel(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Whether the error reports a lost optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether the error means "nothing to act on".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
