//! Exit event dispatch keyed by process identity

use crate::runtime::action::{Action, ActionId};
use chrono::{DateTime, Local};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Notification that a supervised process terminated
#[derive(Debug, Clone, PartialEq)]
pub struct ExitEvent {
    /// Action whose process exited
    pub source: ActionId,
    /// Exit code, `None` if terminated by a signal
    pub code: Option<i32>,
    /// When the exit was observed
    pub timestamp: DateTime<Local>,
}

impl ExitEvent {
    pub fn new(source: ActionId, code: Option<i32>) -> Self {
        Self {
            source,
            code,
            timestamp: Local::now(),
        }
    }

    /// Exited with code zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Reaction to an exit: the actions to start next
pub type ExitHandler = Box<dyn Fn(&ExitEvent) -> Vec<Action> + Send + Sync>;

/// Outcome of [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// Handler will run on the next exit of the identity
    Registered,
    /// The identity already exited; the handler was dropped
    Expired,
}

/// Registry of exit handlers
///
/// Handlers for an identity run in registration order when its exit is
/// published, then they are discarded. Exits are not replayed: subscribing
/// after the exit was published never invokes the handler.
#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<ActionId, Vec<ExitHandler>>,
    published: HashSet<ActionId>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for the exit of `source`
    pub fn subscribe<F>(&mut self, source: impl Into<ActionId>, handler: F) -> Subscription
    where
        F: Fn(&ExitEvent) -> Vec<Action> + Send + Sync + 'static,
    {
        let source = source.into();
        if self.published.contains(&source) {
            log::debug!("[{}] Exit already published, dropping late handler", source);
            return Subscription::Expired;
        }

        self.subscribers
            .entry(source)
            .or_default()
            .push(Box::new(handler));
        Subscription::Registered
    }

    /// Dispatch an exit to its handlers and collect the actions they emit
    pub fn publish(&mut self, event: &ExitEvent) -> Vec<Action> {
        self.published.insert(event.source.clone());

        let Some(handlers) = self.subscribers.remove(&event.source) else {
            return Vec::new();
        };

        log::debug!(
            "[{}] Dispatching exit to {} handler(s)",
            event.source,
            handlers.len()
        );

        handlers.iter().flat_map(|handler| handler(event)).collect()
    }

    /// Number of handlers waiting on `source`
    pub fn subscriber_count(&self, source: &str) -> usize {
        self.subscribers.get(source).map_or(0, Vec::len)
    }

    /// Whether an exit of `source` has been published
    pub fn has_published(&self, source: &str) -> bool {
        self.published.contains(source)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .subscribers
            .iter()
            .map(|(id, handlers)| (id.as_str(), handlers.len()))
            .collect();
        f.debug_struct("EventBus")
            .field("subscribers", &counts)
            .field("published", &self.published)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> impl Fn(&ExitEvent) -> Vec<Action> {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        move |event| {
            log.lock().unwrap().push(format!("{}:{}", tag, event.source));
            Vec::new()
        }
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe("spawn", recording(&log, "first"));
        bus.subscribe("spawn", recording(&log, "second"));
        bus.subscribe("spawn", recording(&log, "third"));

        bus.publish(&ExitEvent::new("spawn".into(), Some(0)));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:spawn", "second:spawn", "third:spawn"]
        );
    }

    #[test]
    fn test_publish_collects_emitted_actions() {
        let mut bus = EventBus::new();
        bus.subscribe("spawn", |_: &ExitEvent| vec![Action::new("a", "true")]);
        bus.subscribe("spawn", |_: &ExitEvent| {
            vec![Action::new("b", "true"), Action::new("c", "true")]
        });

        let ids: Vec<_> = bus
            .publish(&ExitEvent::new("spawn".into(), Some(1)))
            .iter()
            .map(|a| a.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_each_handler_sees_an_event_at_most_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe("spawn", recording(&log, "h"));

        let event = ExitEvent::new("spawn".into(), Some(0));
        bus.publish(&event);
        bus.publish(&event);

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(bus.subscriber_count("spawn"), 0);
    }

    #[test]
    fn test_late_subscription_is_never_invoked() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();

        bus.publish(&ExitEvent::new("spawn".into(), Some(0)));
        let outcome = bus.subscribe("spawn", recording(&log, "late"));
        bus.publish(&ExitEvent::new("spawn".into(), Some(0)));

        assert_eq!(outcome, Subscription::Expired);
        assert!(bus.has_published("spawn"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unrelated_identities_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe("spawn_a", recording(&log, "a"));
        bus.subscribe("spawn_b", recording(&log, "b"));

        bus.publish(&ExitEvent::new("spawn_b".into(), None));

        assert_eq!(*log.lock().unwrap(), vec!["b:spawn_b"]);
        assert_eq!(bus.subscriber_count("spawn_a"), 1);
        assert!(!bus.has_published("spawn_a"));
    }

    #[test]
    fn test_exit_event_success() {
        assert!(ExitEvent::new("x".into(), Some(0)).success());
        assert!(!ExitEvent::new("x".into(), Some(2)).success());
        assert!(!ExitEvent::new("x".into(), None).success());
    }
}
