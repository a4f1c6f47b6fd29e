use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("no session registered for key {0}")]
    SessionNotFound(String),
}

/// Key-value store bound to a session key, used to carry settings and
/// captured identity material across requests.
///
/// Sessions live in memory only and are wiped on process restart. Value
/// keys are case-insensitive.
pub struct Session {
    key: String,
    created: DateTime<Utc>,
    last_retrieval: RwLock<DateTime<Utc>>,
    values: RwLock<HashMap<String, String>>,
}

impl Session {
    fn new(key: String) -> Self {
        let now = Utc::now();
        Self {
            key,
            created: now,
            last_retrieval: RwLock::new(now),
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Session key, can be used to retrieve the session again later.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Timestamp the session was created.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Timestamp the session was last retrieved from the store.
    pub fn last_retrieval(&self) -> DateTime<Utc> {
        *self.last_retrieval.read()
    }

    /// Read the value associated with the given key, `""` when unset.
    pub fn read(&self, key: &str) -> String {
        self.values
            .read()
            .get(&key.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Write a value to the given key, replacing any previous value.
    pub fn write(&self, key: &str, value: impl Into<String>) {
        self.values.write().insert(key.to_lowercase(), value.into());
    }

    /// Returns true when the session has no values set yet.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Drop all values, keeping the session itself registered.
    pub fn clear(&self) {
        self.values.write().clear();
    }

    fn touch(&self) {
        *self.last_retrieval.write() = Utc::now();
    }

    #[cfg(test)]
    pub(crate) fn set_last_retrieval(&self, when: DateTime<Utc>) {
        *self.last_retrieval.write() = when;
    }
}

/// Keyed registry of [`Session`]s, plus the operator's active-session
/// slot. Only one session can be active at a time.
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    active: RwLock<Option<Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            active: RwLock::new(None),
        }
    }

    /// Get the session registered for `key`, creating and registering one
    /// first when absent. Concurrent callers racing on the same key all
    /// end up with the same session.
    pub fn get_or_create(&self, key: &str) -> Arc<Session> {
        let session = self
            .sessions
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Session::new(key.to_string())))
            .clone();
        session.touch();
        session
    }

    /// Create a session under a fresh random key without registering it.
    pub fn create(&self) -> Arc<Session> {
        Arc::new(Session::new(Uuid::new_v4().simple().to_string()))
    }

    /// Look up the session registered for `key`.
    pub fn lookup(&self, key: &str) -> Result<Arc<Session>, SessionError> {
        let session = self
            .sessions
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::SessionNotFound(key.to_string()))?;
        session.touch();
        Ok(session)
    }

    /// Mark `session` as the active one, displacing any previous holder.
    /// Returns the session again for chaining.
    pub fn set_active(&self, session: &Arc<Session>) -> Arc<Session> {
        *self.active.write() = Some(session.clone());
        session.clone()
    }

    pub fn get_active(&self) -> Option<Arc<Session>> {
        self.active.read().clone()
    }

    /// Expunge all sessions not retrieved for longer than `ttl`. The
    /// active session is never expunged, however stale.
    pub fn expunge_expired(&self, ttl: Duration) {
        let cutoff = Utc::now() - ttl;
        let active_key = self.get_active().map(|s| s.key().to_string());
        self.sessions.retain(|key, session| {
            Some(key.as_str()) == active_key.as_deref() || session.last_retrieval() >= cutoff
        });
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_race_free() {
        let store = Arc::new(SessionStore::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.get_or_create("9001") }));
        }

        let first = store.get_or_create("9001");
        for handle in handles {
            let session = handle.await.expect("task panicked");
            assert!(
                Arc::ptr_eq(&first, &session),
                "concurrent get_or_create returned a different session"
            );
        }
    }

    #[test]
    fn value_keys_are_case_insensitive() {
        let store = SessionStore::new();
        let session = store.get_or_create("80");

        session.write("TwitCasting.Host", "dl193250.twitcasting.tv");
        assert_eq!(session.read("twitcasting.host"), "dl193250.twitcasting.tv");

        session.write("twitcasting.host", "dl999.twitcasting.tv");
        assert_eq!(session.read("TWITCASTING.HOST"), "dl999.twitcasting.tv");
    }

    #[test]
    fn missing_values_read_as_empty() {
        let store = SessionStore::new();
        let session = store.get_or_create("80");
        assert_eq!(session.read("nothing.here"), "");
    }

    #[test]
    fn is_empty_tracks_values() {
        let store = SessionStore::new();
        let session = store.get_or_create("80");
        assert!(session.is_empty());

        session.write("a", "b");
        assert!(!session.is_empty());

        session.clear();
        assert!(session.is_empty());
    }

    #[test]
    fn create_does_not_register() {
        let store = SessionStore::new();
        let session = store.create();
        assert!(store.lookup(session.key()).is_err());
        assert!(!session.key().is_empty());
    }

    #[test]
    fn lookup_unknown_key_is_not_found() {
        let store = SessionStore::new();
        assert!(matches!(
            store.lookup("missing"),
            Err(SessionError::SessionNotFound(_))
        ));
    }

    #[test]
    fn set_active_displaces_previous() {
        let store = SessionStore::new();
        let first = store.get_or_create("80");
        let second = store.get_or_create("81");

        store.set_active(&first);
        store.set_active(&second);

        let active = store.get_active().expect("no active session");
        assert!(Arc::ptr_eq(&active, &second));
    }

    #[test]
    fn expunge_removes_stale_sessions_but_spares_active() {
        let store = SessionStore::new();
        let stale = store.get_or_create("stale");
        let active = store.get_or_create("active");
        store.set_active(&active);

        let long_ago = Utc::now() - Duration::hours(48);
        stale.set_last_retrieval(long_ago);
        active.set_last_retrieval(long_ago);

        store.expunge_expired(Duration::hours(24));

        assert!(store.lookup("stale").is_err());
        assert!(store.lookup("active").is_ok());
    }
}
