use crate::error::{already_exists, conflict, invalid_argument, not_found, SessionResult};
use crate::model::{Event, EventWindow, Session, SessionKey, SessionSummary, StateMap};
use crate::scope::{effective_state, merge_into, split_delta};
use crate::store::{AppendOutcome, SessionStore};
use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

struct SessionDoc {
    state: StateMap,
    events: Vec<Event>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

/// In-memory implementation backed by concurrent hash maps, one per
/// document collection.
///
/// Each session document is mutated in place under its map guard, so an
/// append's state merge, timestamp bump, and log push are observed
/// together or not at all. Shared user/app documents live in their own
/// maps and are committed after the session document; a reader between the
/// two writes sees the accepted partial-durability window, never a torn
/// document.
pub struct InMemorySessionStore {
    sessions: DashMap<SessionKey, SessionDoc>,
    user_state: DashMap<(String, String), StateMap>,
    app_state: DashMap<String, StateMap>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
            user_state: DashMap::new(),
            app_state: DashMap::new(),
        }
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn app_snapshot(&self, app_name: &str) -> StateMap {
        self.app_state
            .get(app_name)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    fn user_snapshot(&self, app_name: &str, user_id: &str) -> StateMap {
        self.user_state
            .get(&(app_name.to_owned(), user_id.to_owned()))
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    fn merge_shared(&self, key: &SessionKey, app_delta: &StateMap, user_delta: &StateMap) {
        if !user_delta.is_empty() {
            let mut entry = self
                .user_state
                .entry((key.app_name.clone(), key.user_id.clone()))
                .or_default();
            merge_into(&mut entry, user_delta);
        }
        if !app_delta.is_empty() {
            let mut entry = self.app_state.entry(key.app_name.clone()).or_default();
            merge_into(&mut entry, app_delta);
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
        state: StateMap,
    ) -> SessionResult<Session> {
        let session_id = match session_id {
            Some(id) => id.to_owned(),
            None => Uuid::new_v4().to_string(),
        };
        let key = SessionKey::new(app_name, user_id, session_id);
        key.validate()?;
        let scoped = split_delta(&state)?;

        let now = OffsetDateTime::now_utc();
        match self.sessions.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(already_exists(&key)),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(SessionDoc {
                    state: scoped.session.clone(),
                    events: Vec::new(),
                    created_at: now,
                    updated_at: now,
                });
            }
        }
        self.merge_shared(&key, &scoped.app, &scoped.user);

        let app = self.app_snapshot(app_name);
        let user = self.user_snapshot(app_name, user_id);
        debug!(%key, "created session");
        Ok(Session {
            state: effective_state(&app, &user, &scoped.session),
            key,
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    fn get_session(&self, key: &SessionKey, window: EventWindow) -> SessionResult<Session> {
        key.validate()?;
        let (session_state, events, created_at, updated_at) = {
            let doc = self.sessions.get(key).ok_or_else(|| not_found(key))?;
            (
                doc.state.clone(),
                doc.events.clone(),
                doc.created_at,
                doc.updated_at,
            )
        };
        let app = self.app_snapshot(&key.app_name);
        let user = self.user_snapshot(&key.app_name, &key.user_id);
        Ok(Session {
            key: key.clone(),
            state: effective_state(&app, &user, &session_state),
            events: window.apply(events),
            created_at,
            updated_at,
        })
    }

    fn list_sessions(
        &self,
        app_name: &str,
        user_id: Option<&str>,
    ) -> SessionResult<Vec<SessionSummary>> {
        if app_name.is_empty() {
            return Err(invalid_argument("app_name must not be empty"));
        }
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.app_name == app_name
                    && user_id.map_or(true, |user| key.user_id == user)
            })
            .map(|entry| SessionSummary {
                key: entry.key().clone(),
                state: entry.value().state.clone(),
                created_at: entry.value().created_at,
                updated_at: entry.value().updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.key.session_id.cmp(&b.key.session_id))
        });
        Ok(summaries)
    }

    fn append_event(&self, key: &SessionKey, mut event: Event) -> SessionResult<AppendOutcome> {
        key.validate()?;
        if event.author.is_empty() {
            return Err(invalid_argument("event author must not be empty"));
        }
        if event.id.is_empty() {
            event.id = Uuid::new_v4().to_string();
        }
        let scoped = split_delta(&event.state_delta)?;

        let session_state = {
            let mut doc = self.sessions.get_mut(key).ok_or_else(|| not_found(key))?;
            if doc.events.iter().any(|existing| existing.id == event.id) {
                return Err(conflict(format!(
                    "event {} already appended to session {key}",
                    event.id
                )));
            }
            merge_into(&mut doc.state, &scoped.session);
            // updated_at tracks the event timestamp but never moves backwards.
            if event.timestamp > doc.updated_at {
                doc.updated_at = event.timestamp;
            }
            doc.events.push(event.clone());
            doc.state.clone()
        };
        self.merge_shared(key, &scoped.app, &scoped.user);

        let app = self.app_snapshot(&key.app_name);
        let user = self.user_snapshot(&key.app_name, &key.user_id);
        let mut state = effective_state(&app, &user, &session_state);
        merge_into(&mut state, &scoped.temp);
        debug!(%key, event_id = %event.id, "appended event");
        Ok(AppendOutcome { event, state })
    }

    fn delete_session(&self, key: &SessionKey) -> SessionResult<()> {
        key.validate()?;
        if self.sessions.remove(key).is_some() {
            debug!(%key, "deleted session");
        }
        Ok(())
    }
}
