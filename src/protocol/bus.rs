//! Event registry and dispatch.
//!
//! Lifecycle events run their handler inline on the caller. Contact and
//! message events are queued to a dispatcher task that runs every handler
//! call on tokio's blocking pool, so a slow handler never stalls the sync loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;

use crate::types::{Event, EventKind};

/// Event handler type.
pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

type Registry = Arc<RwLock<HashMap<EventKind, EventHandler>>>;

/// One handler slot per [`EventKind`].
pub struct EventBus {
    handlers: Registry,
    sender: mpsc::UnboundedSender<Event>,
    /// Taken by the first `publish`, which starts the dispatcher.
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn set_listener<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        match self.handlers.write() {
            Ok(mut handlers) => {
                handlers.insert(kind, Arc::new(handler));
            }
            Err(_) => log::error!("event registry poisoned; listener for {kind:?} dropped"),
        }
    }

    /// Run the handler for `event` on the calling task.
    pub fn emit(&self, event: Event) {
        if let Some(handler) = lookup(&self.handlers, event.kind()) {
            handler(event);
        }
    }

    /// Queue `event` for asynchronous dispatch.
    ///
    /// Must be called from within a tokio runtime.
    pub fn publish(&self, event: Event) {
        self.ensure_dispatcher();
        if self.sender.send(event).is_err() {
            log::warn!("event dispatcher stopped; event dropped");
        }
    }

    fn ensure_dispatcher(&self) {
        let receiver = match self.receiver.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(receiver) = receiver {
            tokio::spawn(dispatch(receiver, self.handlers.clone()));
        }
    }
}

fn lookup(handlers: &Registry, kind: EventKind) -> Option<EventHandler> {
    match handlers.read() {
        Ok(handlers) => handlers.get(&kind).cloned(),
        Err(_) => {
            log::error!("event registry poisoned");
            None
        }
    }
}

async fn dispatch(mut receiver: mpsc::UnboundedReceiver<Event>, handlers: Registry) {
    while let Some(event) = receiver.recv().await {
        let Some(handler) = lookup(&handlers, event.kind()) else {
            continue;
        };
        tokio::task::spawn_blocking(move || handler(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::types::{ListenFailed, LoggedIn};

    #[test]
    fn test_emit_runs_inline_and_replaces_handler() {
        let bus = EventBus::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        bus.set_listener(EventKind::LoggedIn, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = second.clone();
        bus.set_listener(EventKind::LoggedIn, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::LoggedIn(LoggedIn {
            device_id: "e1".into(),
        }));
        // No handler for this kind; must be a no-op.
        bus.emit(Event::ListenFailed(ListenFailed {
            consecutive_failures: 1,
            host: "h".into(),
        }));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_publish_reaches_handler() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.set_listener(EventKind::ContactsDeleted, move |event| {
            if let Event::ContactsDeleted(ids) = event {
                let _ = tx.send(ids);
            }
        });

        bus.publish(Event::ContactsDeleted(vec!["@a".into()]));
        bus.publish(Event::ContactsDeleted(vec!["@b".into()]));

        let mut seen = Vec::new();
        for _ in 0..2 {
            let ids = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.extend(ids);
        }
        seen.sort();
        assert_eq!(seen, vec!["@a".to_string(), "@b".to_string()]);
    }
}
