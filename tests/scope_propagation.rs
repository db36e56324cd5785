use agent_sessions::inmemory::InMemorySessionStore;
use agent_sessions::model::{Event, EventWindow, StateMap};
use agent_sessions::store::SessionStore;
use serde_json::{json, Value};

fn delta(entries: &[(&str, Value)]) -> StateMap {
    entries
        .iter()
        .map(|(key, value)| ((*key).to_owned(), value.clone()))
        .collect()
}

#[test]
fn scoped_delta_lands_in_every_tier() {
    let store = InMemorySessionStore::new();
    let session = store
        .create_session("app", "ann", Some("fresh"), StateMap::new())
        .expect("create");

    let outcome = store
        .append_event(
            &session.key,
            Event::new("agent", json!({"text": "hi"})).with_delta(delta(&[
                ("app:greeting", json!("hi")),
                ("user:name", json!("Ann")),
                ("count", json!(1)),
            ])),
        )
        .expect("append");

    assert_eq!(outcome.state.get("greeting"), Some(&json!("hi")));
    assert_eq!(outcome.state.get("name"), Some(&json!("Ann")));
    assert_eq!(outcome.state.get("count"), Some(&json!(1)));
}

#[test]
fn user_scope_is_visible_to_sibling_sessions() {
    let store = InMemorySessionStore::new();
    let first = store
        .create_session("app", "ann", Some("first"), StateMap::new())
        .expect("create first");
    store
        .append_event(
            &first.key,
            Event::new("agent", json!({})).with_delta(delta(&[("user:name", json!("Ann"))])),
        )
        .expect("append");

    // A different session id for the same user sees the key, even though it
    // never received the event.
    let sibling = store
        .create_session("app", "ann", Some("second"), StateMap::new())
        .expect("create sibling");
    let fetched = store
        .get_session(&sibling.key, EventWindow::all())
        .expect("get sibling");
    assert_eq!(fetched.state.get("name"), Some(&json!("Ann")));
    assert!(fetched.events.is_empty());

    // A different user does not.
    let stranger = store
        .create_session("app", "bob", Some("third"), StateMap::new())
        .expect("create stranger");
    assert_eq!(stranger.state.get("name"), None);
}

#[test]
fn app_scope_is_visible_across_users() {
    let store = InMemorySessionStore::new();
    let first = store
        .create_session("app", "ann", Some("s1"), StateMap::new())
        .expect("create");
    store
        .append_event(
            &first.key,
            Event::new("agent", json!({})).with_delta(delta(&[("app:motd", json!("welcome"))])),
        )
        .expect("append");

    let other_user = store
        .create_session("app", "bob", Some("s2"), StateMap::new())
        .expect("create");
    assert_eq!(other_user.state.get("motd"), Some(&json!("welcome")));

    let other_app = store
        .create_session("unrelated-app", "ann", Some("s3"), StateMap::new())
        .expect("create");
    assert_eq!(other_app.state.get("motd"), None);
}

#[test]
fn session_tier_shadows_shared_tiers_on_read() {
    let store = InMemorySessionStore::new();
    let session = store
        .create_session("app", "ann", Some("shadow"), StateMap::new())
        .expect("create");
    store
        .append_event(
            &session.key,
            Event::new("agent", json!({})).with_delta(delta(&[
                ("app:lang", json!("en")),
                ("user:lang", json!("de")),
                ("lang", json!("fr")),
            ])),
        )
        .expect("append");

    let fetched = store
        .get_session(&session.key, EventWindow::all())
        .expect("get");
    assert_eq!(fetched.state.get("lang"), Some(&json!("fr")));

    // A sibling without the session-scoped override sees the user tier win.
    let sibling = store
        .create_session("app", "ann", Some("plain"), StateMap::new())
        .expect("create sibling");
    assert_eq!(sibling.state.get("lang"), Some(&json!("de")));
}

#[test]
fn temp_keys_are_never_persisted() {
    let store = InMemorySessionStore::new();
    let session = store
        .create_session("app", "ann", Some("scratch"), StateMap::new())
        .expect("create");

    let outcome = store
        .append_event(
            &session.key,
            Event::new("agent", json!({})).with_delta(delta(&[
                ("temp:draft", json!("half-written reply")),
                ("count", json!(1)),
            ])),
        )
        .expect("append");
    // Visible in the append's own snapshot...
    assert_eq!(outcome.state.get("draft"), Some(&json!("half-written reply")));

    // ...but gone from every subsequent read.
    let fetched = store
        .get_session(&session.key, EventWindow::all())
        .expect("get");
    assert_eq!(fetched.state.get("draft"), None);
    assert_eq!(fetched.state.get("count"), Some(&json!(1)));
}

#[test]
fn deleting_a_session_leaves_shared_state_behind() {
    let store = InMemorySessionStore::new();
    let doomed = store
        .create_session("app", "ann", Some("doomed"), StateMap::new())
        .expect("create");
    store
        .append_event(
            &doomed.key,
            Event::new("agent", json!({})).with_delta(delta(&[
                ("user:name", json!("Ann")),
                ("app:motd", json!("welcome")),
                ("local", json!("dies with the session")),
            ])),
        )
        .expect("append");

    store.delete_session(&doomed.key).expect("delete");

    let survivor = store
        .create_session("app", "ann", Some("survivor"), StateMap::new())
        .expect("create survivor");
    assert_eq!(survivor.state.get("name"), Some(&json!("Ann")));
    assert_eq!(survivor.state.get("motd"), Some(&json!("welcome")));
    assert_eq!(survivor.state.get("local"), None);
}
