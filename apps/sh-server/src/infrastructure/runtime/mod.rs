//! Event Loop Runtime
//!
//! Owns the inbound event channel and drives the dispatcher. Inbound
//! protocol events (from the transport host) and timer fires (from the
//! Tokio scheduler) share one bounded channel and are handled one at a
//! time, in arrival order.
//!
//! # Lifecycle
//!
//! - [`ShServer::start`] dispatches `ServiceStarted` and then processes
//!   events until stopped
//! - [`ShServer::stop`] cancels the loop and ends every subscription

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::TransportPort;
use crate::application::services::{Event, RequestDispatcher};
use crate::domain::peer::Peer;
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::config::ServerConfig;
use crate::infrastructure::scheduler::TokioTimerScheduler;

/// Runtime errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// `start` was called on a server whose loop already ran.
    #[error("event loop already started")]
    AlreadyStarted,
}

/// The Sh server: dispatcher, registry and event loop.
pub struct ShServer {
    dispatcher: RequestDispatcher,
    transport: Arc<dyn TransportPort>,
    registry: Arc<SubscriptionRegistry>,
    sender: mpsc::Sender<Event>,
    receiver: Mutex<Option<mpsc::Receiver<Event>>>,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl ShServer {
    /// Wire a server over `transport`, with a Tokio-backed timer scheduler
    /// feeding the event channel.
    #[must_use]
    pub fn new(config: &ServerConfig, transport: Arc<dyn TransportPort>) -> Self {
        let (sender, receiver) = mpsc::channel(config.event_loop.queue_capacity);
        let timers = Arc::new(TokioTimerScheduler::new(sender.clone()));
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = RequestDispatcher::new(
            config.notification.into(),
            Arc::clone(&transport),
            timers,
            Arc::clone(&registry),
        );

        Self {
            dispatcher,
            transport,
            registry,
            sender,
            receiver: Mutex::new(Some(receiver)),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Sender for delivering inbound events to the loop.
    #[must_use]
    pub fn event_sender(&self) -> mpsc::Sender<Event> {
        self.sender.clone()
    }

    /// The subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Peers currently known to the transport.
    #[must_use]
    pub fn peers(&self) -> Vec<Peer> {
        self.transport.connected_peers()
    }

    /// Whether the event loop is processing events.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Token canceled when the server stops.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the event loop until [`stop`](Self::stop) is called.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::AlreadyStarted` if the loop has run before.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        let Some(mut events) = self.receiver.lock().take() else {
            return Err(RuntimeError::AlreadyStarted);
        };

        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Sh server event loop started");

        let _ = self.dispatcher.dispatch(Event::ServiceStarted).await;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::debug!("Event loop cancelled");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::debug!("Event channel closed");
                        break;
                    };
                    // Failures are logged and counted by the dispatcher.
                    let _ = self.dispatcher.dispatch(event).await;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        let ended = self.dispatcher.end_all();
        tracing::info!(ended, "Sh server event loop stopped");
        Ok(())
    }

    /// Stop the event loop and end every remaining subscription.
    pub fn stop(&self) {
        self.cancel.cancel();
        let ended = self.dispatcher.end_all();
        tracing::info!(ended, "Sh server stopping");
    }
}
