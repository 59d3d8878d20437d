//! Lifecycle events published by backends
use crate::backend::Backend;
use std::fmt;

/// Wire-level event kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Register,
    Heartbeat,
    Unregister,
    OccupancyIncrease,
    OccupancyDecrease,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Register,
        EventKind::Heartbeat,
        EventKind::Unregister,
        EventKind::OccupancyIncrease,
        EventKind::OccupancyDecrease,
    ];

    pub fn code(self) -> u8 {
        match self {
            EventKind::Register => 0,
            EventKind::Heartbeat => 1,
            EventKind::Unregister => 2,
            EventKind::OccupancyIncrease => 3,
            EventKind::OccupancyDecrease => 4,
        }
    }

    /// `None` for codes this build does not know; never guesses a default
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(EventKind::Register),
            1 => Some(EventKind::Heartbeat),
            2 => Some(EventKind::Unregister),
            3 => Some(EventKind::OccupancyIncrease),
            4 => Some(EventKind::OccupancyDecrease),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Register => "register",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Unregister => "unregister",
            EventKind::OccupancyIncrease => "occupancy_increase",
            EventKind::OccupancyDecrease => "occupancy_decrease",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Register(Backend),
    Heartbeat(Backend),
    /// Removal needs only the key
    Unregister(String),
    OccupancyIncrease(Backend),
    OccupancyDecrease(Backend),
}

/// One message on the bus
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleEvent {
    /// Producer clock, epoch millis; unrelated to the registry's `last_seen`
    pub emitted_at: i64,
    pub action: Lifecycle,
}

impl LifecycleEvent {
    pub fn new(action: Lifecycle, emitted_at: i64) -> Self {
        Self { emitted_at, action }
    }

    /// Event stamped with the current wall clock
    pub fn now(action: Lifecycle) -> Self {
        Self::new(action, chrono::Utc::now().timestamp_millis())
    }

    pub fn register(backend: Backend) -> Self {
        Self::now(Lifecycle::Register(backend))
    }

    pub fn heartbeat(backend: Backend) -> Self {
        Self::now(Lifecycle::Heartbeat(backend))
    }

    pub fn unregister(name: impl Into<String>) -> Self {
        Self::now(Lifecycle::Unregister(name.into()))
    }

    pub fn kind(&self) -> EventKind {
        match &self.action {
            Lifecycle::Register(_) => EventKind::Register,
            Lifecycle::Heartbeat(_) => EventKind::Heartbeat,
            Lifecycle::Unregister(_) => EventKind::Unregister,
            Lifecycle::OccupancyIncrease(_) => EventKind::OccupancyIncrease,
            Lifecycle::OccupancyDecrease(_) => EventKind::OccupancyDecrease,
        }
    }

    /// Name of the backend the event is about
    pub fn name(&self) -> &str {
        match &self.action {
            Lifecycle::Unregister(name) => name,
            Lifecycle::Register(backend)
            | Lifecycle::Heartbeat(backend)
            | Lifecycle::OccupancyIncrease(backend)
            | Lifecycle::OccupancyDecrease(backend) => &backend.name,
        }
    }

    /// The carried snapshot; `None` for unregister
    pub fn backend(&self) -> Option<&Backend> {
        match &self.action {
            Lifecycle::Unregister(_) => None,
            Lifecycle::Register(backend)
            | Lifecycle::Heartbeat(backend)
            | Lifecycle::OccupancyIncrease(backend)
            | Lifecycle::OccupancyDecrease(backend) => Some(backend),
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @{}", self.kind(), self.name(), self.emitted_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(EventKind::from_code(5), None);
        assert_eq!(EventKind::from_code(u8::MAX), None);
    }

    #[test]
    fn test_accessors() {
        let backend = Backend::new("lobby-1", "10.0.0.1", 25565);
        let event = LifecycleEvent::new(Lifecycle::OccupancyIncrease(backend.clone()), 42);
        assert_eq!(event.kind(), EventKind::OccupancyIncrease);
        assert_eq!(event.name(), "lobby-1");
        assert_eq!(event.backend(), Some(&backend));

        let event = LifecycleEvent::unregister("lobby-1");
        assert_eq!(event.kind(), EventKind::Unregister);
        assert_eq!(event.name(), "lobby-1");
        assert!(event.backend().is_none());
    }

    #[test]
    fn test_display() {
        let event = LifecycleEvent::new(Lifecycle::Unregister("lobby-1".to_string()), 7);
        assert_eq!(event.to_string(), "unregister lobby-1 @7");
    }
}
