//! Change notifications.
//!
//! Callbacks run after the tick or mutation that caused them, outside every
//! engine lock, so a listener may immediately issue queries without
//! deadlocking. Listeners must not block.

use parking_lot::Mutex;

/// What changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Any engine state changed (fired for every tick and mutation).
    State,
    /// The guild set changed.
    Guilds,
    /// A specific territory changed.
    Territory(String),
    /// A specific guild's holdings or configuration changed.
    Guild(String),
}

type Callback = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Registry of change listeners.
#[derive(Default)]
pub struct Notifier {
    callbacks: Mutex<Vec<Callback>>,
}

impl Notifier {
    pub fn register(&self, callback: Callback) {
        self.callbacks.lock().push(callback);
    }

    /// Invoke every listener for every event, in order.
    pub fn emit(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }
        let callbacks = self.callbacks.lock();
        for event in events {
            for callback in callbacks.iter() {
                callback(event);
            }
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("callbacks", &self.callbacks.lock().len())
            .finish()
    }
}
