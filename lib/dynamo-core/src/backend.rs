//! Backend entity
use crate::error::ValidationError;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Longest accepted backend name, in bytes
pub const MAX_NAME_LEN: usize = 128;

/// A game-server instance as last reported by its producer.
///
/// Values are never patched in place by the registry: every event replaces the
/// stored snapshot wholesale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backend {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub groups: BTreeSet<String>,
    /// Epoch millis of the last event applied for this backend
    pub last_seen: i64,
    /// Advisory; may momentarily exceed `max_players`
    pub current_players: u32,
    pub max_players: u32,
}

impl Backend {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            groups: BTreeSet::new(),
            last_seen: 0,
            current_players: 0,
            max_players: 0,
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_players(mut self, current: u32, max: u32) -> Self {
        self.current_players = current;
        self.max_players = max;
        self
    }

    pub fn with_last_seen(mut self, last_seen: i64) -> Self {
        self.last_seen = last_seen;
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// At or above capacity. A backend with `max_players == 0` is always full.
    pub fn is_full(&self) -> bool {
        self.current_players >= self.max_players
    }

    /// Fill ratio in `[0, ∞)`; a zero capacity scores as empty
    pub fn player_ratio(&self) -> f64 {
        if self.max_players == 0 {
            return 0.0;
        }
        f64::from(self.current_players) / f64::from(self.max_players)
    }

    /// Whether more than `timeout` has elapsed between `last_seen` and `now_ms`
    pub fn is_timed_out(&self, now_ms: i64, timeout: Duration) -> bool {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.last_seen) > timeout_ms
    }

    /// Check the fields an upserting event needs
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        if self.host.trim().is_empty() {
            return Err(ValidationError::EmptyHost(self.name.clone()));
        }
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                name: self.name.clone(),
                port: self.port,
            });
        }
        Ok(())
    }
}

/// Names are registry keys: non-empty, bounded, no whitespace or control chars
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN
        || name.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(ValidationError::MalformedName(name.to_string()));
    }
    Ok(())
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<&str> = self.groups.iter().map(String::as_str).collect();
        write!(
            f,
            "{} ({}) [{}] {}/{}",
            self.name,
            self.address(),
            groups.join(","),
            self.current_players,
            self.max_players
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby() -> Backend {
        Backend::new("lobby-1", "10.0.0.1", 25565)
            .with_groups(["lobby"])
            .with_players(0, 20)
    }

    #[test]
    fn test_player_ratio() {
        assert_eq!(lobby().with_players(5, 10).player_ratio(), 0.5);
        assert_eq!(lobby().with_players(3, 0).player_ratio(), 0.0);
    }

    #[test]
    fn test_is_full() {
        assert!(!lobby().is_full());
        assert!(lobby().with_players(20, 20).is_full());
        assert!(lobby().with_players(25, 20).is_full());
        assert!(lobby().with_players(0, 0).is_full());
    }

    #[test]
    fn test_is_timed_out_is_strict() {
        let backend = lobby().with_last_seen(1_000);
        let timeout = Duration::from_secs(30);
        assert!(!backend.is_timed_out(31_000, timeout));
        assert!(backend.is_timed_out(31_001, timeout));
    }

    #[test]
    fn test_validate() {
        assert!(lobby().validate().is_ok());
        assert_eq!(
            Backend::new("", "10.0.0.1", 25565).validate(),
            Err(ValidationError::EmptyName)
        );
        assert!(matches!(
            Backend::new("lobby 1", "10.0.0.1", 25565).validate(),
            Err(ValidationError::MalformedName(_))
        ));
        assert!(matches!(
            Backend::new("lobby-1", "", 25565).validate(),
            Err(ValidationError::EmptyHost(_))
        ));
        assert!(matches!(
            Backend::new("lobby-1", "10.0.0.1", 0).validate(),
            Err(ValidationError::InvalidPort { port: 0, .. })
        ));
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_display() {
        let backend = lobby().with_groups(["lobby", "hub"]).with_players(3, 20);
        assert_eq!(backend.to_string(), "lobby-1 (10.0.0.1:25565) [hub,lobby] 3/20");
    }
}
