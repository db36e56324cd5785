//! State scope resolution and merge logic.
//!
//! Every state key carries its visibility in a prefix: `app:` for
//! application-wide, `user:` for user-wide, `temp:` for call-local, and no
//! prefix for session-local. Classification lives here and nowhere else, so
//! the write path (splitting a delta) and the read path (merging tiers) can
//! never disagree on where a key belongs.

use crate::error::{invalid_argument, SessionResult};
use crate::model::StateMap;

pub const APP_PREFIX: &str = "app:";
pub const USER_PREFIX: &str = "user:";
pub const TEMP_PREFIX: &str = "temp:";

/// Visibility tier of a single state key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateScope {
    /// Shared by every session of the application.
    App,
    /// Shared by every session of one user within the application.
    User,
    /// Private to one session.
    Session,
    /// Surfaced in the current call's result only; never persisted.
    Temp,
}

/// Classifies a key and strips its scope prefix.
///
/// Pure and total: the same key always yields the same tier. Keys that are
/// nothing but a prefix come back with an empty remainder; `split_delta`
/// rejects those.
pub fn classify(key: &str) -> (StateScope, &str) {
    if let Some(rest) = key.strip_prefix(APP_PREFIX) {
        (StateScope::App, rest)
    } else if let Some(rest) = key.strip_prefix(USER_PREFIX) {
        (StateScope::User, rest)
    } else if let Some(rest) = key.strip_prefix(TEMP_PREFIX) {
        (StateScope::Temp, rest)
    } else {
        (StateScope::Session, key)
    }
}

/// A state delta partitioned by scope, prefixes stripped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScopedDelta {
    pub app: StateMap,
    pub user: StateMap,
    pub session: StateMap,
    pub temp: StateMap,
}

impl ScopedDelta {
    pub fn is_empty(&self) -> bool {
        self.app.is_empty() && self.user.is_empty() && self.session.is_empty()
    }
}

/// Splits a raw delta into its four tiers.
///
/// Fails with `InvalidArgument` when a key is a bare scope prefix
/// (e.g. `"user:"`), since the stored key would be empty.
pub fn split_delta(delta: &StateMap) -> SessionResult<ScopedDelta> {
    let mut scoped = ScopedDelta::default();
    for (key, value) in delta {
        if key.is_empty() {
            return Err(invalid_argument("state key must not be empty"));
        }
        let (scope, stripped) = classify(key);
        if stripped.is_empty() && !matches!(scope, StateScope::Session) {
            return Err(invalid_argument(format!(
                "state key {key:?} is a bare scope prefix"
            )));
        }
        let target = match scope {
            StateScope::App => &mut scoped.app,
            StateScope::User => &mut scoped.user,
            StateScope::Session => &mut scoped.session,
            StateScope::Temp => &mut scoped.temp,
        };
        target.insert(stripped.to_owned(), value.clone());
    }
    Ok(scoped)
}

/// Merges `delta` into `target`, overwriting on key collision.
pub fn merge_into(target: &mut StateMap, delta: &StateMap) {
    for (key, value) in delta {
        target.insert(key.clone(), value.clone());
    }
}

/// Computes the effective state for a session: app, then user, then session,
/// later tiers winning on collision. Recomputed on every read, never stored.
pub fn effective_state(app: &StateMap, user: &StateMap, session: &StateMap) -> StateMap {
    let mut merged = app.clone();
    merge_into(&mut merged, user);
    merge_into(&mut merged, session);
    merged
}
