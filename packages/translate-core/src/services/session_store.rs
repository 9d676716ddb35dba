//! Session/Connection store with a secondary index by (sessionId, targetLanguage).
//!
//! Mirrors the primary-map-plus-secondary-index shape used elsewhere in this
//! codebase for O(1) reverse lookups, generalized from a single-value index
//! to a per-language connection *set* since many listeners can share a
//! target language.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{PipelineError, PipelineResult};
use crate::model::{Connection, Session, SessionStatus};

/// session_id -> (targetLanguage -> set of listener connectionIds).
///
/// Guarded by a per-session `RwLock` so that a `list_listener_languages` call
/// and a concurrent `delete_connection` for the same session never interleave
/// their index mutation/read halfway through.
type ListenerIndex = RwLock<HashMap<String, HashSet<String>>>;

/// Durable mapping of sessions and connections (component B).
pub struct SessionConnectionStore {
    sessions: DashMap<String, Session>,
    connections: DashMap<String, Connection>,
    listener_index: DashMap<String, Arc<ListenerIndex>>,
}

impl SessionConnectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            connections: DashMap::new(),
            listener_index: DashMap::new(),
        }
    }

    fn index_for(&self, session_id: &str) -> Arc<ListenerIndex> {
        self.listener_index
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(HashMap::new())))
            .clone()
    }

    /// Inserts or overwrites a session record.
    pub fn put_session(&self, session: Session) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    #[must_use]
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|r| r.value().clone())
    }

    /// Applies `mutator` to the session in place and returns the updated
    /// value, or `None` if the session doesn't exist.
    pub fn update_session<F>(&self, session_id: &str, mutator: F) -> Option<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut entry = self.sessions.get_mut(session_id)?;
        mutator(&mut entry);
        Some(entry.clone())
    }

    /// Transitions a session to `ended` and returns the connection IDs that
    /// were attached to it at the moment of transition (I4: all must be
    /// terminated and excluded from new notifications before this returns).
    pub fn end_session(&self, session_id: &str) -> Option<Vec<String>> {
        let mut entry = self.sessions.get_mut(session_id)?;
        if entry.status == SessionStatus::Ended {
            return Some(self.connection_ids_for_session(session_id));
        }
        entry.status = SessionStatus::Ended;
        drop(entry);
        Some(self.connection_ids_for_session(session_id))
    }

    fn connection_ids_for_session(&self, session_id: &str) -> Vec<String> {
        self.connections
            .iter()
            .filter(|r| r.value().session_id == session_id)
            .map(|r| r.key().clone())
            .collect()
    }

    /// All connections currently attached to a session.
    #[must_use]
    pub fn connections_for_session(&self, session_id: &str) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|r| r.value().session_id == session_id)
            .map(|r| r.value().clone())
            .collect()
    }

    /// The session's current speaker connection, if any (I3 eviction check).
    #[must_use]
    pub fn speaker_for_session(&self, session_id: &str) -> Option<Connection> {
        self.connections
            .iter()
            .find(|r| r.value().session_id == session_id && r.value().is_speaker())
            .map(|r| r.value().clone())
    }

    /// Snapshot of every live connection, for the reaper sweep's TTL scan.
    #[must_use]
    pub fn all_connections(&self) -> Vec<Connection> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Snapshot of every known session (including ended ones still retained
    /// pending reap), for admin-surface counters.
    #[must_use]
    pub fn active_session_count(&self) -> usize {
        self.sessions.iter().filter(|r| r.value().is_active()).count()
    }

    /// Snapshot of every known session, for the reaper's TTL scan.
    #[must_use]
    pub fn all_sessions(&self) -> Vec<Session> {
        self.sessions.iter().map(|r| r.value().clone()).collect()
    }

    /// Inserts a connection. Rejects if the session is missing or not active
    /// (I1).
    pub fn put_connection(&self, conn: Connection) -> PipelineResult<()> {
        {
            let session = self
                .sessions
                .get(&conn.session_id)
                .ok_or_else(|| PipelineError::NotFound(format!("session {} not found", conn.session_id)))?;
            if !session.is_active() {
                return Err(PipelineError::NotFound(format!(
                    "session {} is not active",
                    conn.session_id
                )));
            }
        }
        if conn.is_listener() {
            if let Some(lang) = conn.target_language.clone() {
                let index = self.index_for(&conn.session_id);
                index
                    .write()
                    .entry(lang)
                    .or_default()
                    .insert(conn.connection_id.clone());
            }
        }
        self.connections.insert(conn.connection_id.clone(), conn);
        Ok(())
    }

    #[must_use]
    pub fn get_connection(&self, connection_id: &str) -> Option<Connection> {
        self.connections.get(connection_id).map(|r| r.value().clone())
    }

    /// Removes a connection, reaping its listener-index entry if present
    /// (I5). Idempotent: removing an already-gone connection is a no-op that
    /// returns `None`.
    pub fn delete_connection(&self, connection_id: &str) -> Option<Connection> {
        let (_, removed) = self.connections.remove(connection_id)?;
        if removed.is_listener() {
            if let Some(lang) = &removed.target_language {
                let index = self.index_for(&removed.session_id);
                let mut guard = index.write();
                if let Some(set) = guard.get_mut(lang) {
                    set.remove(connection_id);
                    if set.is_empty() {
                        guard.remove(lang);
                    }
                }
            }
        }
        Some(removed)
    }

    /// The distinct set of target languages with at least one live listener
    /// for `session_id`.
    #[must_use]
    pub fn list_listener_languages(&self, session_id: &str) -> HashSet<String> {
        let index = self.index_for(session_id);
        let guard = index.read();
        guard
            .iter()
            .filter(|(_, conns)| !conns.is_empty())
            .map(|(lang, _)| lang.clone())
            .collect()
    }

    /// The live listener connection IDs for (session_id, target_language).
    #[must_use]
    pub fn lookup_connections(&self, session_id: &str, target_language: &str) -> Vec<String> {
        let index = self.index_for(session_id);
        let guard = index.read();
        guard
            .get(target_language)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for SessionConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}
