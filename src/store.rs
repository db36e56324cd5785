use crate::error::SessionResult;
use crate::model::{Event, EventWindow, Session, SessionKey, SessionSummary, StateMap};

/// Result of a successful `append_event`.
#[derive(Clone, Debug)]
pub struct AppendOutcome {
    /// The stored event, including any server-assigned fields.
    pub event: Event,
    /// Effective state right after the append. Unlike the state on
    /// `Session`, this snapshot also layers the delta's `temp:` keys on
    /// top; they exist only in this value.
    pub state: StateMap,
}

/// Durable session storage for conversational agents.
///
/// A session is addressed by its `(app_name, user_id, session_id)` triple
/// and owns an append-only event log. Deltas carried by appended events are
/// dispatched by key prefix into the session document or the shared
/// user/app state documents, and reads return the merged view of all three
/// tiers. Implementations must be safe to call concurrently from
/// independent call sites without external locking.
pub trait SessionStore: Send + Sync + 'static {
    /// Creates a session, generating a session id when `session_id` is
    /// `None`. The initial state is split by scope exactly like an event
    /// delta. Fails with `AlreadyExists` when the triple is already live.
    fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
        state: StateMap,
    ) -> SessionResult<Session>;

    /// Fetches a session with its effective state and the events selected
    /// by `window`. Fails with `NotFound` when the triple is absent.
    fn get_session(&self, key: &SessionKey, window: EventWindow) -> SessionResult<Session>;

    /// Lists live sessions for an application, optionally restricted to one
    /// user. Summaries carry session-scoped state only and are ordered by
    /// `updated_at` descending, ties broken by `session_id`.
    fn list_sessions(
        &self,
        app_name: &str,
        user_id: Option<&str>,
    ) -> SessionResult<Vec<SessionSummary>>;

    /// Appends an event, applying its delta tier by tier: session-scoped
    /// keys into the session document (atomically with the log append and
    /// the `updated_at` bump), user/app-scoped keys into the shared
    /// documents, `temp:` keys into the returned snapshot only. Fails with
    /// `NotFound` for an absent session and `Conflict` when the event id is
    /// already in the log.
    fn append_event(&self, key: &SessionKey, event: Event) -> SessionResult<AppendOutcome>;

    /// Removes the session and every event it owns. Idempotent: deleting an
    /// absent session succeeds. Shared user/app state is never touched.
    fn delete_session(&self, key: &SessionKey) -> SessionResult<()>;
}
