//! Application-service façade over sessions.
//!
//! Every use-case follows the same shape: load the session, apply one
//! transition, save it, then hand the recorded events to the dispatcher.
//! Events of a failed save are dropped. Save and dispatch of one chat run
//! under that chat's lock, so events reach the dispatcher in version order.
//!
//! Prompts run in two phases. [`ChatService::submit_prompt`] opens the
//! exchange and returns; a detached task then calls the completion gateway
//! and records the reply or an interruption. That task outlives the request
//! that spawned it and is bounded only by its own timeout and by
//! [`ChatService::shutdown`].

use crate::config::ServiceConfig;
use crate::gateway::CompletionGateway;
use crate::view::SessionView;
use chatrelay_core::{ChatId, Identity, RelayError, RelayResult};
use chatrelay_session::{
    Dispatcher, Session, SessionPolicy, SessionStore, CAUSE_SHUTDOWN,
};
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Cause recorded when the completion call exceeds its deadline.
pub const CAUSE_TIMEOUT: &str = "timeout";

const CHAT_LOCK_STRIPES: usize = 64;

struct Inner {
    store: Arc<dyn SessionStore>,
    dispatcher: Arc<Dispatcher>,
    gateway: Arc<dyn CompletionGateway>,
    config: ServiceConfig,
    policy: SessionPolicy,
    permits: Semaphore,
    chat_locks: Vec<Mutex<()>>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

/// Use-cases consumed by channel adapters. Cheap to clone.
#[derive(Clone)]
pub struct ChatService {
    inner: Arc<Inner>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        dispatcher: Arc<Dispatcher>,
        gateway: Arc<dyn CompletionGateway>,
        config: ServiceConfig,
    ) -> Self {
        let policy = config.policy();
        let permits = Semaphore::new(config.max_concurrent_completions.max(1));
        Self {
            inner: Arc::new(Inner {
                store,
                dispatcher,
                gateway,
                config,
                policy,
                permits,
                chat_locks: (0..CHAT_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// The expiry policy applied to every chat.
    pub fn policy(&self) -> &SessionPolicy {
        &self.inner.policy
    }

    /// Number of completion tasks still running.
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Starts a chat for `identity`.
    ///
    /// An active chat that has outlived the policy is ended first; any other
    /// active chat makes this fail with `Conflict("duplicate session")`.
    pub async fn start_session(&self, identity: &Identity) -> RelayResult<ChatId> {
        match self.inner.store.find_active(identity).await {
            Ok(mut existing) => {
                if !existing.evaluate(Utc::now(), &self.inner.policy) {
                    return Err(RelayError::Conflict("duplicate session".into()));
                }
                info!(chat_id = %existing.id(), "Expired chat ended before starting a new one");
                self.inner.persist(&mut existing).await?;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut session = Session::open(identity.clone());
        if let Err(e) = self.inner.persist(&mut session).await {
            error!(chat_id = %session.id(), user = %identity, error = %e, "Failed to start chat");
            return Err(e);
        }
        info!(chat_id = %session.id(), user = %identity, "Chat started");
        Ok(session.id())
    }

    /// View of the identity's active chat.
    pub async fn get_active(&self, identity: &Identity) -> RelayResult<SessionView> {
        let session = self.inner.store.find_active(identity).await?;
        Ok(SessionView::from(&session))
    }

    /// View of any chat, ended or not.
    pub async fn get_by_id(&self, id: ChatId) -> RelayResult<SessionView> {
        let session = self.inner.store.find_by_id(id).await?;
        Ok(SessionView::from(&session))
    }

    /// Opens an exchange and schedules its completion.
    ///
    /// Returns once the exchange is persisted; the reply is delivered later
    /// through the dispatcher. A chat found past its limits is ended here
    /// and the prompt is refused with `Terminated`.
    pub async fn submit_prompt(
        &self,
        identity: &Identity,
        text: &str,
        message_ref: &str,
    ) -> RelayResult<()> {
        let mut session = self.inner.store.find_active(identity).await?;

        if session.evaluate(Utc::now(), &self.inner.policy) {
            self.inner.persist(&mut session).await?;
            return Err(RelayError::Terminated);
        }

        if let Err(e) = session.prompt(text, message_ref) {
            warn!(chat_id = %session.id(), error = %e, "Prompt rejected");
            return Err(e);
        }
        if let Err(e) = self.inner.persist(&mut session).await {
            error!(chat_id = %session.id(), error = %e, "Failed to save prompt");
            return Err(e);
        }
        info!(chat_id = %session.id(), user = %identity, "Prompt accepted");

        let inner = Arc::clone(&self.inner);
        let chat_id = session.id();
        self.inner.tasks.spawn(async move {
            inner.complete(chat_id).await;
        });
        Ok(())
    }

    /// Ends the identity's active chat. Best-effort: failures are logged.
    ///
    /// A `Conflict` means the chat moved under us (typically a completion
    /// landing); the chat is reloaded and the end retried up to
    /// `end_retry_attempts` times.
    pub async fn end_session(&self, identity: &Identity) {
        let attempts = self.inner.config.end_retry_attempts.max(1);
        for attempt in 1..=attempts {
            let mut session = match self.inner.store.find_active(identity).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(user = %identity, error = %e, "No chat to end");
                    return;
                }
            };

            session.end();
            match self.inner.persist(&mut session).await {
                Ok(()) => {
                    info!(chat_id = %session.id(), user = %identity, "Chat ended");
                    return;
                }
                Err(e) if e.is_conflict() && attempt < attempts => {
                    debug!(chat_id = %session.id(), attempt, "Chat changed while ending, retrying");
                }
                Err(e) => {
                    warn!(chat_id = %session.id(), error = %e, "Failed to save ended chat");
                    return;
                }
            }
        }
    }

    /// Interrupts in-flight completions with cause `shutdown` and waits
    /// until their outcome is persisted and dispatched.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        info!("Chat service stopped");
    }
}

impl Inner {
    fn chat_lock(&self, chat_id: ChatId) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        chat_id.hash(&mut hasher);
        &self.chat_locks[(hasher.finish() % self.chat_locks.len() as u64) as usize]
    }

    /// Saves `session` and dispatches its events; drops them on failure.
    ///
    /// Holds the chat's lock across both steps: a later save of the same
    /// chat cannot dispatch ahead of this one.
    async fn persist(&self, session: &mut Session) -> RelayResult<()> {
        let _guard = self.chat_lock(session.id()).lock().await;
        match self.store.save(session).await {
            Ok(()) => {
                self.dispatcher.dispatch(session.take_events());
                Ok(())
            }
            Err(e) => {
                session.discard_events();
                Err(e)
            }
        }
    }

    /// Detached phase of a prompt.
    ///
    /// Works on the aggregate loaded before the call, so anything that
    /// changed the chat meanwhile (an end, a newer prompt) fails the final
    /// save with a version conflict and the outcome is abandoned.
    async fn complete(&self, chat_id: ChatId) {
        let mut session = match self.store.find_by_id(chat_id).await {
            Ok(session) => session,
            Err(e) => {
                error!(chat_id = %chat_id, error = %e, "Failed to load chat for completion");
                return;
            }
        };
        if session.current().is_none() {
            debug!(chat_id = %chat_id, "Nothing in flight, completion skipped");
            return;
        }

        let call = tokio::time::timeout(self.config.completion_timeout(), async {
            let _permit = self.permits.acquire().await;
            self.gateway.complete(&session).await
        });
        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(CAUSE_SHUTDOWN.to_string()),
            result = call => match result {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(e)) => {
                    warn!(chat_id = %chat_id, gateway = self.gateway.name(), error = %e, "Completion failed");
                    Err(e.to_string())
                }
                Err(_) => {
                    warn!(chat_id = %chat_id, gateway = self.gateway.name(), "Completion timed out");
                    Err(CAUSE_TIMEOUT.to_string())
                }
            },
        };

        match outcome {
            Ok(reply) => match session.reply(reply) {
                Ok(_) => {
                    if session.evaluate(Utc::now(), &self.policy) {
                        info!(chat_id = %chat_id, "Chat reached its limits");
                    }
                }
                Err(e) => {
                    warn!(chat_id = %chat_id, error = %e, "Reply rejected");
                    session.interrupt(e.to_string());
                }
            },
            Err(cause) => {
                session.interrupt(cause);
            }
        }

        match self.persist(&mut session).await {
            Ok(()) => debug!(chat_id = %chat_id, "Completion recorded"),
            Err(e) if e.is_conflict() => {
                info!(chat_id = %chat_id, "Chat changed during completion, outcome abandoned");
            }
            Err(e) => error!(chat_id = %chat_id, error = %e, "Failed to save completion"),
        }
    }
}
