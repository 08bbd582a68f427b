use async_trait::async_trait;
use chatrelay_core::RelayResult;
use chatrelay_session::Session;

/// Produces the reply of a session's in-flight exchange.
///
/// Only called while the session has exactly one exchange in flight.
/// Implementations read the whole history plus the current prompt to build a
/// multi-turn context. The caller records the returned text with
/// [`Session::reply`], or interrupts the exchange on error. Deadlines are
/// enforced by the caller.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Returns the reply text for `session`'s current prompt.
    async fn complete(&self, session: &Session) -> RelayResult<String>;
}
