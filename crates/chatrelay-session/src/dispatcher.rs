//! In-process mediator between session events and channel notifiers.
//!
//! Handlers are registered once on a [`DispatcherBuilder`]; after
//! [`DispatcherBuilder::start`] the routing table is immutable and shared by
//! every lane without locking.
//!
//! Dispatch is fire-and-forget: [`Dispatcher::dispatch`] queues a batch on
//! the bounded lane owned by the batch's chat and returns. One lane
//! delivers its batches in FIFO order, so the events of a chat reach
//! handlers in the order they were saved, while different chats proceed on
//! other lanes. A full lane drops the batch and logs it.

use crate::event::{EventKind, SessionEvent};
use async_trait::async_trait;
use chatrelay_core::{Channel, ChatId, RelayResult};
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Default number of delivery lanes.
pub const DEFAULT_LANES: usize = 4;

/// Default number of batches a lane queues while its handlers are busy.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A subscriber that turns session events into channel notifications.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Event kinds this handler wants.
    fn listening(&self) -> Vec<EventKind>;

    /// Restricts delivery to events of one channel. `None` receives all.
    fn channel(&self) -> Option<Channel> {
        None
    }

    /// Handles one event. Errors are logged by the dispatcher and never
    /// reach the request that produced the event.
    async fn handle(&self, cancel: &CancellationToken, event: &SessionEvent) -> RelayResult<()>;
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Routes {
    by_kind: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl Routes {
    async fn deliver(&self, cancel: &CancellationToken, event: &SessionEvent) {
        let Some(handlers) = self.by_kind.get(&event.kind()) else {
            return;
        };
        for handler in handlers {
            if handler.channel().is_some_and(|c| c != event.channel()) {
                continue;
            }
            if let Err(e) = handler.handle(cancel, event).await {
                warn!(
                    handler = handler.name(),
                    event_kind = %event.kind(),
                    chat_id = %event.chat_id(),
                    error = %e,
                    "Event handler failed"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DispatcherBuilder
// ---------------------------------------------------------------------------

/// Collects subscriptions before the dispatcher starts.
pub struct DispatcherBuilder {
    handlers: Vec<Arc<dyn EventHandler>>,
    lanes: usize,
    queue_capacity: usize,
}

impl DispatcherBuilder {
    /// Creates a builder with no handlers, [`DEFAULT_LANES`] lanes and
    /// [`DEFAULT_QUEUE_CAPACITY`] queued batches per lane.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            lanes: DEFAULT_LANES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Registers a handler for every kind it is listening to.
    pub fn subscribe(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Sets the number of delivery lanes (at least one).
    pub fn lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes.max(1);
        self
    }

    /// Sets how many batches a lane holds while its handlers are busy (at
    /// least one). Batches beyond that are dropped and logged.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Freezes the routing table and spawns one worker per lane.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Dispatcher {
        let mut routes = Routes::default();
        for handler in self.handlers {
            for kind in handler.listening() {
                routes
                    .by_kind
                    .entry(kind)
                    .or_default()
                    .push(Arc::clone(&handler));
            }
        }
        let routes = Arc::new(routes);
        let cancel = CancellationToken::new();
        let workers = TaskTracker::new();

        let mut senders = Vec::with_capacity(self.lanes);
        for lane in 0..self.lanes {
            let (tx, mut rx) = mpsc::channel::<Vec<SessionEvent>>(self.queue_capacity);
            let routes = Arc::clone(&routes);
            let cancel = cancel.clone();
            workers.spawn(async move {
                while let Some(batch) = rx.recv().await {
                    for event in &batch {
                        routes.deliver(&cancel, event).await;
                    }
                }
                debug!(lane, "Dispatcher lane drained");
            });
            senders.push(tx);
        }
        workers.close();

        Dispatcher {
            routes,
            lanes: RwLock::new(senders),
            lane_count: self.lanes,
            workers,
            cancel,
        }
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes session events to the handlers subscribed to their kind.
pub struct Dispatcher {
    routes: Arc<Routes>,
    lanes: RwLock<Vec<mpsc::Sender<Vec<SessionEvent>>>>,
    lane_count: usize,
    workers: TaskTracker,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Shorthand for [`DispatcherBuilder::new`].
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Queues the events of one save for delivery and returns immediately.
    ///
    /// All events of a batch must belong to the same chat. When the chat's
    /// lane is full the batch is dropped with a warning.
    pub fn dispatch(&self, events: Vec<SessionEvent>) {
        let Some(first) = events.first() else {
            return;
        };
        let chat_id = first.chat_id();
        let lanes = self.lanes.read();
        let Some(lane) = lanes.get(self.lane_for(chat_id)) else {
            warn!(chat_id = %chat_id, dropped = events.len(), "Dispatcher stopped, events dropped");
            return;
        };
        match lane.try_send(events) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(events)) => {
                warn!(chat_id = %chat_id, dropped = events.len(), "Dispatcher lane full, events dropped");
            }
            Err(mpsc::error::TrySendError::Closed(events)) => {
                warn!(chat_id = %chat_id, dropped = events.len(), "Dispatcher lane closed, events dropped");
            }
        }
    }

    /// Number of handlers subscribed to `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.routes.by_kind.get(&kind).map_or(0, Vec::len)
    }

    /// Stops accepting events, delivers everything already queued and
    /// waits for the lane workers.
    pub async fn shutdown(&self) {
        self.lanes.write().clear();
        self.workers.wait().await;
    }

    /// Like [`Dispatcher::shutdown`], but once `grace` has passed the
    /// handlers' token is cancelled so stalled deliveries give up. Queued
    /// events are still handed to handlers, which see a cancelled token.
    ///
    /// Returns `false` when the grace period ran out.
    pub async fn shutdown_with_grace(&self, grace: Duration) -> bool {
        self.lanes.write().clear();
        if tokio::time::timeout(grace, self.workers.wait()).await.is_ok() {
            return true;
        }
        warn!(grace_ms = grace.as_millis() as u64, "Dispatcher drain timed out, cancelling handlers");
        self.cancel.cancel();
        self.workers.wait().await;
        false
    }

    fn lane_for(&self, chat_id: ChatId) -> usize {
        let mut hasher = DefaultHasher::new();
        chat_id.hash(&mut hasher);
        (hasher.finish() % self.lane_count as u64) as usize
    }
}
