use crate::error::{
    already_exists, conflict, corrupt, invalid_argument, not_found, redis_error, SessionError,
    SessionResult,
};
use crate::model::{Event, EventWindow, Session, SessionKey, SessionSummary, StateMap};
use crate::scope::{effective_state, merge_into, split_delta};
use crate::store::{AppendOutcome, SessionStore};
use redis::{Client, Commands, Connection};
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_NAMESPACE: &str = "agent:session";
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);
const READ_RETRIES: u32 = 2;
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Redis-backed session store that mirrors the in-memory semantics.
///
/// Each logical document maps to a small group of namespaced keys. Session
/// documents are updated additively (`HSET` per state key, `RPUSH` per
/// event) inside a `MULTI`/`EXEC` pipeline, so concurrent appends to the
/// same session combine instead of overwriting each other, and a reader
/// never observes an event without its state merge. A per-application zset
/// scored by update time (written with `ZADD GT` so scores never move
/// backwards) drives listing order.
///
/// Constructors accept connection URLs only; no Redis client types appear
/// in the public API.
pub struct RedisSessionStore {
    client: Client,
    namespace: String,
    io_timeout: Duration,
}

impl RedisSessionStore {
    /// Creates a store using a Redis URL and the default namespace prefix.
    pub fn from_url(url: impl AsRef<str>) -> SessionResult<Self> {
        Self::from_url_with_namespace(url, DEFAULT_NAMESPACE)
    }

    /// Creates a store using a Redis URL and a custom namespace prefix.
    pub fn from_url_with_namespace(
        url: impl AsRef<str>,
        namespace: impl Into<String>,
    ) -> SessionResult<Self> {
        let client = Client::open(url.as_ref()).map_err(redis_error)?;
        Ok(Self {
            client,
            namespace: namespace.into(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        })
    }

    /// Overrides the per-command read/write timeout. Operations that hit
    /// the timeout fail with `Unavailable` rather than hang.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    fn conn(&self) -> SessionResult<Connection> {
        let conn = self.client.get_connection().map_err(redis_error)?;
        conn.set_read_timeout(Some(self.io_timeout))
            .map_err(redis_error)?;
        conn.set_write_timeout(Some(self.io_timeout))
            .map_err(redis_error)?;
        Ok(conn)
    }

    fn session_key_prefix(&self, key: &SessionKey) -> String {
        format!(
            "{}:session:{}:{}:{}",
            self.namespace, key.app_name, key.user_id, key.session_id
        )
    }

    fn meta_key(&self, key: &SessionKey) -> String {
        format!("{}:meta", self.session_key_prefix(key))
    }

    fn state_key(&self, key: &SessionKey) -> String {
        format!("{}:state", self.session_key_prefix(key))
    }

    fn events_key(&self, key: &SessionKey) -> String {
        format!("{}:events", self.session_key_prefix(key))
    }

    fn event_ids_key(&self, key: &SessionKey) -> String {
        format!("{}:event_ids", self.session_key_prefix(key))
    }

    fn user_state_key(&self, app_name: &str, user_id: &str) -> String {
        format!("{}:user:{}:{}", self.namespace, app_name, user_id)
    }

    fn app_state_key(&self, app_name: &str) -> String {
        format!("{}:app:{}", self.namespace, app_name)
    }

    fn index_key(&self, app_name: &str) -> String {
        format!("{}:index:{}", self.namespace, app_name)
    }

    fn index_member(key: &SessionKey) -> SessionResult<String> {
        Ok(serde_json::to_string(&(&key.user_id, &key.session_id))?)
    }

    fn parse_index_member(raw: &str) -> SessionResult<(String, String)> {
        serde_json::from_str(raw)
            .map_err(|_| corrupt(format!("malformed session index member {raw:?}")))
    }

    fn merge_shared(
        &self,
        conn: &mut Connection,
        key: &SessionKey,
        app_delta: &StateMap,
        user_delta: &StateMap,
    ) -> SessionResult<()> {
        if !user_delta.is_empty() {
            let target = self.user_state_key(&key.app_name, &key.user_id);
            Self::merge_hash(conn, &target, user_delta)?;
        }
        if !app_delta.is_empty() {
            let target = self.app_state_key(&key.app_name);
            Self::merge_hash(conn, &target, app_delta)?;
        }
        Ok(())
    }

    fn merge_hash(conn: &mut Connection, target: &str, delta: &StateMap) -> SessionResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in delta {
            pipe.hset(target, key, serde_json::to_string(value)?).ignore();
        }
        pipe.query::<()>(conn).map_err(redis_error)
    }

    fn shared_snapshot(&self, conn: &mut Connection, target: &str) -> SessionResult<StateMap> {
        let raw: HashMap<String, String> = conn.hgetall(target).map_err(redis_error)?;
        decode_state(raw)
    }

    fn fetch_session(&self, key: &SessionKey, window: EventWindow) -> SessionResult<Session> {
        let mut conn = self.conn()?;
        let member = Self::index_member(key)?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hget(self.meta_key(key), "created_at")
            .hgetall(self.state_key(key))
            .lrange(self.events_key(key), 0, -1)
            .zscore(self.index_key(&key.app_name), &member)
            .hgetall(self.user_state_key(&key.app_name, &key.user_id))
            .hgetall(self.app_state_key(&key.app_name));
        #[allow(clippy::type_complexity)]
        let (created_raw, state_raw, events_raw, score, user_raw, app_raw): (
            Option<String>,
            HashMap<String, String>,
            Vec<String>,
            Option<f64>,
            HashMap<String, String>,
            HashMap<String, String>,
        ) = pipe.query(&mut conn).map_err(redis_error)?;

        let created_at = match created_raw {
            Some(raw) => decode_ts(&raw)?,
            None => return Err(not_found(key)),
        };
        let updated_at = match score {
            Some(score) => timestamp_from_score(score)?,
            None => created_at,
        };
        let mut events = Vec::with_capacity(events_raw.len());
        for payload in events_raw {
            events.push(serde_json::from_str::<Event>(&payload)?);
        }
        let session_state = decode_state(state_raw)?;
        let user_state = decode_state(user_raw)?;
        let app_state = decode_state(app_raw)?;

        Ok(Session {
            key: key.clone(),
            state: effective_state(&app_state, &user_state, &session_state),
            events: window.apply(events),
            created_at,
            updated_at,
        })
    }

    fn fetch_summaries(
        &self,
        app_name: &str,
        user_filter: Option<&str>,
    ) -> SessionResult<Vec<SessionSummary>> {
        let mut conn = self.conn()?;
        let index = self.index_key(app_name);
        let members: Vec<(String, f64)> = conn
            .zrevrange_withscores(&index, 0, -1)
            .map_err(redis_error)?;

        let mut summaries = Vec::new();
        for (member, score) in members {
            let (user_id, session_id) = Self::parse_index_member(&member)?;
            if user_filter.map_or(false, |user| user_id != user) {
                continue;
            }
            let key = SessionKey::new(app_name, user_id, session_id);
            let (created_raw, state_raw): (Option<String>, HashMap<String, String>) =
                redis::pipe()
                    .atomic()
                    .hget(self.meta_key(&key), "created_at")
                    .hgetall(self.state_key(&key))
                    .query(&mut conn)
                    .map_err(redis_error)?;
            let Some(created_raw) = created_raw else {
                // Stale index entry left behind by a racing delete; prune it.
                let _: () = conn.zrem(&index, &member).map_err(redis_error)?;
                continue;
            };
            summaries.push(SessionSummary {
                key,
                state: decode_state(state_raw)?,
                created_at: decode_ts(&created_raw)?,
                updated_at: timestamp_from_score(score)?,
            });
        }
        summaries.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.key.session_id.cmp(&b.key.session_id))
        });
        Ok(summaries)
    }

    fn with_read_retry<T>(
        &self,
        op: &'static str,
        action: impl Fn() -> SessionResult<T>,
    ) -> SessionResult<T> {
        let mut attempt = 0;
        loop {
            match action() {
                Err(SessionError::Unavailable(message)) if attempt < READ_RETRIES => {
                    attempt += 1;
                    warn!(op, attempt, error = %message, "retrying idempotent read");
                    std::thread::sleep(READ_RETRY_BACKOFF * attempt);
                }
                other => return other,
            }
        }
    }
}

impl SessionStore for RedisSessionStore {
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
        let mut conn = self.conn()?;
        // created_at doubles as the uniqueness sentinel for the triple.
        let meta_key = self.meta_key(&key);
        let created: bool = conn
            .hset_nx(&meta_key, "created_at", encode_ts(now))
            .map_err(redis_error)?;
        if !created {
            return Err(already_exists(&key));
        }

        let member = Self::index_member(&key)?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (state_field, value) in &scoped.session {
            pipe.hset(self.state_key(&key), state_field, serde_json::to_string(value)?)
                .ignore();
        }
        pipe.cmd("ZADD")
            .arg(self.index_key(app_name))
            .arg("GT")
            .arg(score(now))
            .arg(&member)
            .ignore();
        if let Err(err) = pipe.query::<()>(&mut conn).map_err(redis_error) {
            // Best effort: release the uniqueness sentinel so a retry can
            // recreate the session instead of hitting AlreadyExists.
            let _: Result<(), _> = conn.del(&meta_key);
            return Err(err);
        }
        self.merge_shared(&mut conn, &key, &scoped.app, &scoped.user)?;

        let app_state = self.shared_snapshot(&mut conn, &self.app_state_key(app_name))?;
        let user_state =
            self.shared_snapshot(&mut conn, &self.user_state_key(app_name, user_id))?;
        debug!(%key, "created session");
        Ok(Session {
            state: effective_state(&app_state, &user_state, &scoped.session),
            key,
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    fn get_session(&self, key: &SessionKey, window: EventWindow) -> SessionResult<Session> {
        key.validate()?;
        self.with_read_retry("get_session", || self.fetch_session(key, window))
    }

    fn list_sessions(
        &self,
        app_name: &str,
        user_id: Option<&str>,
    ) -> SessionResult<Vec<SessionSummary>> {
        if app_name.is_empty() {
            return Err(invalid_argument("app_name must not be empty"));
        }
        self.with_read_retry("list_sessions", || self.fetch_summaries(app_name, user_id))
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
        let payload = serde_json::to_string(&event)?;

        let mut conn = self.conn()?;
        let exists: bool = conn.exists(self.meta_key(key)).map_err(redis_error)?;
        if !exists {
            return Err(not_found(key));
        }
        // Reserving the id first makes a blind caller retry safe: the
        // duplicate lands here as Conflict instead of double-applying.
        let event_ids_key = self.event_ids_key(key);
        let reserved: bool = conn.sadd(&event_ids_key, &event.id).map_err(redis_error)?;
        if !reserved {
            return Err(conflict(format!(
                "event {} already appended to session {key}",
                event.id
            )));
        }

        let member = Self::index_member(key)?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (state_field, value) in &scoped.session {
            pipe.hset(self.state_key(key), state_field, serde_json::to_string(value)?)
                .ignore();
        }
        pipe.rpush(self.events_key(key), &payload).ignore();
        pipe.cmd("ZADD")
            .arg(self.index_key(&key.app_name))
            .arg("GT")
            .arg(score(event.timestamp))
            .arg(&member)
            .ignore();
        if let Err(err) = pipe.query::<()>(&mut conn).map_err(redis_error) {
            let _: Result<(), _> = conn.srem(&event_ids_key, &event.id);
            return Err(err);
        }
        self.merge_shared(&mut conn, key, &scoped.app, &scoped.user)?;

        let session_state = self.shared_snapshot(&mut conn, &self.state_key(key))?;
        let app_state = self.shared_snapshot(&mut conn, &self.app_state_key(&key.app_name))?;
        let user_state =
            self.shared_snapshot(&mut conn, &self.user_state_key(&key.app_name, &key.user_id))?;
        let mut state = effective_state(&app_state, &user_state, &session_state);
        merge_into(&mut state, &scoped.temp);
        debug!(%key, event_id = %event.id, "appended event");
        Ok(AppendOutcome { event, state })
    }

    fn delete_session(&self, key: &SessionKey) -> SessionResult<()> {
        key.validate()?;
        let member = Self::index_member(key)?;
        let mut conn = self.conn()?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(self.meta_key(key))
            .ignore()
            .del(self.state_key(key))
            .ignore()
            .del(self.events_key(key))
            .ignore()
            .del(self.event_ids_key(key))
            .ignore()
            .zrem(self.index_key(&key.app_name), &member)
            .ignore();
        pipe.query::<()>(&mut conn).map_err(redis_error)?;
        debug!(%key, "deleted session");
        Ok(())
    }
}

fn decode_state(raw: HashMap<String, String>) -> SessionResult<StateMap> {
    let mut map = StateMap::new();
    for (key, payload) in raw {
        map.insert(key, serde_json::from_str(&payload)?);
    }
    Ok(map)
}

fn encode_ts(ts: OffsetDateTime) -> String {
    ts.unix_timestamp_nanos().to_string()
}

fn decode_ts(raw: &str) -> SessionResult<OffsetDateTime> {
    let nanos: i128 = raw
        .parse()
        .map_err(|_| corrupt(format!("malformed stored timestamp {raw:?}")))?;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|err| corrupt(err.to_string()))
}

fn score(ts: OffsetDateTime) -> f64 {
    ts.unix_timestamp_nanos() as f64 / 1e9
}

fn timestamp_from_score(score: f64) -> SessionResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos((score * 1e9).round() as i128)
        .map_err(|err| corrupt(err.to_string()))
}
