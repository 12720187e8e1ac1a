//! Termination notifications from the supervisor to interested listeners.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;

/// Emitted once when a supervised process exits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TerminationEvent {
    pub exit_code: i32,
    pub stderr: String,
}

/// Returns false once it wants no further events.
type Listener = Arc<dyn Fn(&TerminationEvent) -> bool + Send + Sync>;

/// Ordered list of listeners. Every listener sees every event emitted after it
/// registered, in registration order; nothing is replayed to late listeners.
#[derive(Clone, Default)]
pub struct TerminationNotifier {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl std::fmt::Debug for TerminationNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminationNotifier")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl TerminationNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_terminate<F>(&self, listener: F)
    where
        F: Fn(&TerminationEvent) + Send + Sync + 'static,
    {
        self.lock().push(Arc::new(move |event: &TerminationEvent| {
            listener(event);
            true
        }));
    }

    /// Channel-flavoured subscription for async consumers. Dropped once the
    /// receiver is gone.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TerminationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(Arc::new(move |event: &TerminationEvent| {
            tx.send(event.clone()).is_ok()
        }));
        rx
    }

    pub fn emit(&self, event: TerminationEvent) {
        // Snapshot so a listener may register another listener without deadlocking.
        let listeners: Vec<Listener> = self.lock().clone();
        tracing::info!(
            exit_code = event.exit_code,
            listeners = listeners.len(),
            "inference server process terminated"
        );
        let finished: Vec<Listener> = listeners
            .into_iter()
            .filter(|listener| !listener(&event))
            .collect();
        if !finished.is_empty() {
            self.lock()
                .retain(|l| !finished.iter().any(|f| Arc::ptr_eq(l, f)));
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Listener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}
