use crate::error::{invalid_argument, SessionResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Flat mapping of state keys to document values.
pub type StateMap = serde_json::Map<String, Value>;

/// Unique address of a session: `(app_name, user_id, session_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Rejects keys with empty components before they reach a backend.
    pub fn validate(&self) -> SessionResult<()> {
        if self.app_name.is_empty() {
            return Err(invalid_argument("app_name must not be empty"));
        }
        if self.user_id.is_empty() {
            return Err(invalid_argument("user_id must not be empty"));
        }
        if self.session_id.is_empty() {
            return Err(invalid_argument("session_id must not be empty"));
        }
        Ok(())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

/// A single interaction turn. Immutable once appended to a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    pub author: String,
    pub timestamp: OffsetDateTime,
    /// Opaque payload; the store never inspects it.
    pub content: Value,
    /// Partial state update applied when the event is appended.
    pub state_delta: StateMap,
}

impl Event {
    /// Creates an event with a generated id, a now-utc timestamp, and an
    /// empty delta.
    pub fn new(author: impl Into<String>, content: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            invocation_id: String::new(),
            author: author.into(),
            timestamp: OffsetDateTime::now_utc(),
            content,
            state_delta: StateMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = invocation_id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_delta(mut self, delta: StateMap) -> Self {
        self.state_delta = delta;
        self
    }
}

/// A session as returned by `create_session` and `get_session`.
///
/// `state` holds the merged effective state (app, user, and session tiers
/// combined, prefixes stripped); the session-scoped slice alone is never
/// exposed through this type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub state: StateMap,
    pub events: Vec<Event>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Listing row: identity, timestamps, and session-scoped state only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub key: SessionKey,
    pub state: StateMap,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Restricts which events a `get_session` call returns.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventWindow {
    /// Keep only the N most recent events.
    pub num_recent: Option<usize>,
    /// Keep only events with `timestamp >= after`.
    pub after: Option<OffsetDateTime>,
}

impl EventWindow {
    /// Window that keeps the full log.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn last(num_recent: usize) -> Self {
        Self {
            num_recent: Some(num_recent),
            after: None,
        }
    }

    pub fn after(timestamp: OffsetDateTime) -> Self {
        Self {
            num_recent: None,
            after: Some(timestamp),
        }
    }

    pub fn and_last(mut self, num_recent: usize) -> Self {
        self.num_recent = Some(num_recent);
        self
    }

    /// Applies the window to a chronologically ordered log, preserving
    /// chronological order in the result. The time filter runs before the
    /// recency cut, so `after + last(n)` means "the most recent n of the
    /// events since `after`".
    pub fn apply(&self, mut events: Vec<Event>) -> Vec<Event> {
        if let Some(after) = self.after {
            events.retain(|event| event.timestamp >= after);
        }
        if let Some(limit) = self.num_recent {
            if events.len() > limit {
                let cut = events.len() - limit;
                events.drain(..cut);
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::Duration;

    fn event_at(id: &str, ts: OffsetDateTime) -> Event {
        Event::new("agent", json!({"seq": id}))
            .with_id(id)
            .with_timestamp(ts)
    }

    #[test]
    fn window_last_n_keeps_most_recent_in_order() {
        let base = OffsetDateTime::now_utc();
        let events: Vec<_> = (0..5)
            .map(|i| event_at(&format!("e{i}"), base + Duration::seconds(i)))
            .collect();

        let windowed = EventWindow::last(2).apply(events);
        let ids: Vec<_> = windowed.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e3", "e4"]);
    }

    #[test]
    fn window_after_is_inclusive() {
        let base = OffsetDateTime::now_utc();
        let events: Vec<_> = (0..3)
            .map(|i| event_at(&format!("e{i}"), base + Duration::seconds(i)))
            .collect();

        let windowed = EventWindow::after(base + Duration::seconds(1)).apply(events);
        let ids: Vec<_> = windowed.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
    }

    #[test]
    fn key_validation_rejects_empty_components() {
        assert!(SessionKey::new("app", "user", "s1").validate().is_ok());
        assert!(SessionKey::new("", "user", "s1").validate().is_err());
        assert!(SessionKey::new("app", "", "s1").validate().is_err());
        assert!(SessionKey::new("app", "user", "").validate().is_err());
    }
}
