//! Session lifecycle and persistence.
//!
//! A session is one continuing identity: a fingerprint profile, a cookie
//! jar, and activity timestamps bounded by an inactivity window. Sessions
//! live in an in-memory cache with an optional redb-backed store behind it
//! so identities survive process restarts. Restored state is re-validated
//! before reuse; anything stale or inconsistent is regenerated instead of
//! silently trusted.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::modules::fingerprint::{
    FingerprintError, FingerprintProfile, ProfileProvider, is_consistent,
};
use crate::modules::obfuscation::{CookieJar, RotationPolicy};

const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// One continuing identity across requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub profile: FingerprintProfile,
    pub jar: CookieJar,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    fn new(id: String, profile: FingerprintProfile) -> Self {
        let now = Utc::now();
        Self {
            id,
            profile,
            jar: CookieJar::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn is_expired(&self, window: Duration) -> bool {
        let horizon =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::minutes(30));
        Utc::now() - self.last_activity >= horizon
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sessions idle longer than this are never reused.
    pub inactivity_window: Duration,
    pub rotation: RotationPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_window: Duration::from_secs(30 * 60),
            rotation: RotationPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store error: {0}")]
    Store(#[from] redb::Error),
    #[error("session record corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("profile generation failed: {0}")]
    Fingerprint(#[from] FingerprintError),
}

/// Durable key-value store for serialized sessions.
struct SessionStore {
    db: Database,
}

impl SessionStore {
    fn open(path: &Path) -> Result<Self, SessionError> {
        let db = Database::create(path).map_err(redb::Error::from)?;
        // Make sure the table exists so reads never hit TableDoesNotExist.
        let txn = db.begin_write().map_err(redb::Error::from)?;
        txn.open_table(SESSIONS).map_err(redb::Error::from)?;
        txn.commit().map_err(redb::Error::from)?;
        Ok(Self { db })
    }

    fn put(&self, key: &str, session: &Session) -> Result<(), SessionError> {
        let bytes = serde_json::to_vec(session)?;
        let txn = self.db.begin_write().map_err(redb::Error::from)?;
        {
            let mut table = txn.open_table(SESSIONS).map_err(redb::Error::from)?;
            table
                .insert(key, bytes.as_slice())
                .map_err(redb::Error::from)?;
        }
        txn.commit().map_err(redb::Error::from)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Session>, SessionError> {
        let txn = self.db.begin_read().map_err(redb::Error::from)?;
        let table = txn.open_table(SESSIONS).map_err(redb::Error::from)?;
        match table.get(key).map_err(redb::Error::from)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        let txn = self.db.begin_write().map_err(redb::Error::from)?;
        {
            let mut table = txn.open_table(SESSIONS).map_err(redb::Error::from)?;
            table.remove(key).map_err(redb::Error::from)?;
        }
        txn.commit().map_err(redb::Error::from)?;
        Ok(())
    }

    /// Delete every record whose session is past the inactivity window.
    fn sweep(&self, window: Duration) -> Result<usize, SessionError> {
        let mut expired = Vec::new();
        {
            let txn = self.db.begin_read().map_err(redb::Error::from)?;
            let table = txn.open_table(SESSIONS).map_err(redb::Error::from)?;
            for entry in table.iter().map_err(redb::Error::from)? {
                let (key, value) = entry.map_err(redb::Error::from)?;
                match serde_json::from_slice::<Session>(value.value()) {
                    Ok(session) if session.is_expired(window) => {
                        expired.push(key.value().to_string());
                    }
                    Ok(_) => {}
                    // Corrupt records are dead weight either way.
                    Err(_) => expired.push(key.value().to_string()),
                }
            }
        }

        for key in &expired {
            self.remove(key)?;
        }
        Ok(expired.len())
    }
}

/// Session cache plus optional durable store.
pub struct SessionManager {
    config: SessionConfig,
    provider: ProfileProvider,
    cache: RwLock<HashMap<String, Session>>,
    store: Option<SessionStore>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, provider: ProfileProvider) -> Self {
        Self {
            config,
            provider,
            cache: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Attach a durable store at `path`, restoring sessions lazily on `get`.
    pub fn with_store(
        config: SessionConfig,
        provider: ProfileProvider,
        path: &Path,
    ) -> Result<Self, SessionError> {
        Ok(Self {
            config,
            provider,
            cache: RwLock::new(HashMap::new()),
            store: Some(SessionStore::open(path)?),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Return a live session for `key`, restoring or creating as needed.
    pub fn get(&self, key: &str) -> Result<Session, SessionError> {
        {
            let cache = self.cache.read().expect("session cache poisoned");
            if let Some(session) = cache.get(key)
                && !session.is_expired(self.config.inactivity_window)
            {
                return Ok(session.clone());
            }
        }

        if let Some(restored) = self.restore(key)? {
            return Ok(restored);
        }

        self.create(key)
    }

    /// Restore from the durable store, re-validating the record before it
    /// is allowed back into rotation. Returns `None` when there is nothing
    /// usable so the caller falls through to regeneration.
    pub fn restore(&self, key: &str) -> Result<Option<Session>, SessionError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(mut session) = store.get(key)? else {
            return Ok(None);
        };

        if session.is_expired(self.config.inactivity_window) {
            store.remove(key)?;
            return Ok(None);
        }
        if !is_consistent(&session.profile) {
            log::warn!("restored session {key} had an inconsistent profile, regenerating");
            store.remove(key)?;
            return Ok(None);
        }

        // Cookies are rotated/validated on restore, never reused verbatim.
        let mut rng = StdRng::from_entropy();
        session
            .jar
            .prepare_for_reuse(&self.config.rotation, &mut rng);

        let mut cache = self.cache.write().expect("session cache poisoned");
        cache.insert(key.to_string(), session.clone());
        Ok(Some(session))
    }

    fn create(&self, key: &str) -> Result<Session, SessionError> {
        let profile = self.provider.generate(None)?;
        let suffix: u32 = rand::thread_rng().r#gen();
        let session = Session::new(format!("{key}-{suffix:08x}"), profile);

        let mut cache = self.cache.write().expect("session cache poisoned");
        cache.insert(key.to_string(), session.clone());
        drop(cache);

        self.persist(key, &session)?;
        Ok(session)
    }

    /// Mutate the session under `key` and write it back through the store.
    pub fn update<F>(&self, key: &str, f: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut Session),
    {
        let updated = {
            let mut cache = self.cache.write().expect("session cache poisoned");
            cache.get_mut(key).map(|session| {
                f(session);
                session.clone()
            })
        };

        if let Some(session) = updated {
            self.persist(key, &session)?;
        }
        Ok(())
    }

    /// Write one session through to the durable store under its manager
    /// key.
    pub fn persist(&self, key: &str, session: &Session) -> Result<(), SessionError> {
        if let Some(store) = &self.store {
            store.put(key, session)?;
        }
        Ok(())
    }

    /// Drop expired sessions from cache and store. Returns how many store
    /// records were removed.
    pub fn expire(&self) -> Result<usize, SessionError> {
        let window = self.config.inactivity_window;
        {
            let mut cache = self.cache.write().expect("session cache poisoned");
            cache.retain(|_, session| !session.is_expired(window));
        }
        match &self.store {
            Some(store) => store.sweep(window),
            None => Ok(0),
        }
    }

    pub fn teardown(&self, key: &str) -> Result<(), SessionError> {
        {
            let mut cache = self.cache.write().expect("session cache poisoned");
            cache.remove(key);
        }
        if let Some(store) = &self.store {
            store.remove(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::obfuscation::{CookieCategory, StoredCookie};

    fn manager() -> SessionManager {
        SessionManager::new(SessionConfig::default(), ProfileProvider::default())
    }

    #[test]
    fn creates_session_with_consistent_profile() {
        let manager = manager();
        let session = manager.get("endpoint-1").unwrap();
        assert!(is_consistent(&session.profile));
        assert!(session.id.starts_with("endpoint-1-"));
    }

    #[test]
    fn same_key_reuses_the_same_identity() {
        let manager = manager();
        let first = manager.get("endpoint-1").unwrap();
        let second = manager.get("endpoint-1").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.profile, second.profile);
    }

    #[test]
    fn expired_sessions_are_not_reused() {
        let manager = SessionManager::new(
            SessionConfig {
                inactivity_window: Duration::from_millis(10),
                ..SessionConfig::default()
            },
            ProfileProvider::default(),
        );
        let first = manager.get("endpoint-1").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let second = manager.get("endpoint-1").unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn expire_sweeps_stale_cache_entries() {
        let manager = SessionManager::new(
            SessionConfig {
                inactivity_window: Duration::from_millis(10),
                ..SessionConfig::default()
            },
            ProfileProvider::default(),
        );
        manager.get("a").unwrap();
        manager.get("b").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        manager.expire().unwrap();

        let cache = manager.cache.read().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn persist_then_restore_round_trips_a_valid_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.redb");

        let manager = SessionManager::with_store(
            SessionConfig::default(),
            ProfileProvider::default(),
            &path,
        )
        .unwrap();

        let mut created = manager.get("endpoint-1").unwrap();
        created.jar.insert(StoredCookie {
            name: "sid".into(),
            value: "abc".into(),
            category: CookieCategory::Session,
            stored_at: Utc::now(),
            expires_at: None,
        });
        manager
            .update("endpoint-1", |session| {
                *session = created.clone();
            })
            .unwrap();
        drop(manager);

        let reopened = SessionManager::with_store(
            SessionConfig::default(),
            ProfileProvider::default(),
            &path,
        )
        .unwrap();
        let restored = reopened.restore("endpoint-1").unwrap().unwrap();

        assert_eq!(restored.id, created.id);
        assert!(is_consistent(&restored.profile));
        assert!(restored.jar.get("sid").is_some());
    }

    #[test]
    fn restore_rejects_expired_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.redb");

        {
            let manager = SessionManager::with_store(
                SessionConfig {
                    inactivity_window: Duration::from_millis(10),
                    ..SessionConfig::default()
                },
                ProfileProvider::default(),
                &path,
            )
            .unwrap();
            manager.get("endpoint-1").unwrap();
        }

        std::thread::sleep(Duration::from_millis(20));
        let reopened = SessionManager::with_store(
            SessionConfig {
                inactivity_window: Duration::from_millis(10),
                ..SessionConfig::default()
            },
            ProfileProvider::default(),
            &path,
        )
        .unwrap();
        assert!(reopened.restore("endpoint-1").unwrap().is_none());
    }
}
