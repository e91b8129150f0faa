//! Keyed collection of sessions with a "current" pointer
//!
//! Stored values may be raw JSON (straight from disk or a front end) or
//! canonical sessions. Every read resolves through the normalizer, so a
//! corrupted entry is repaired the first time it is touched. The store key is
//! authoritative: a session's `id` always equals the key it is stored under.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::normalize::{normalize_session, SessionInput};
use super::types::{Session, UNTITLED};
use crate::error::{ParleyError, Result};

/// Listing row for a stored session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub last_activity: String,
    pub has_error: bool,
}

/// In-memory session store
#[derive(Debug, Default, Clone)]
pub struct SessionStore {
    entries: BTreeMap<String, SessionInput>,
    current: Option<String>,
}

impl SessionStore {
    /// Creates an empty store
    ///
    /// An empty store is never handed to consumers as-is; call
    /// [`SessionStore::validate`] before rendering or persisting.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a persisted `{ session_id: Session }` document
    ///
    /// Every entry is repaired once here, so ids and defaulted timestamps
    /// stay the same across reads. The current pointer is left unset until
    /// [`SessionStore::validate`]. A document that is not a JSON object
    /// yields an empty store.
    pub fn from_document(document: Value) -> Self {
        let mut store = Self::new();
        match document {
            Value::Object(map) => {
                for (key, value) in map {
                    let session = resolve(&key, SessionInput::Raw(value));
                    store.entries.insert(key, SessionInput::Canonical(session));
                }
            }
            other => {
                tracing::warn!(
                    "Session document is not a JSON object ({}), starting empty",
                    if other.is_null() { "null" } else { "wrong type" }
                );
            }
        }
        store
    }

    /// Create a new session, insert it and make it current
    pub fn create(&mut self, title: impl Into<String>) -> Session {
        let session = Session::new(title);
        self.entries
            .insert(session.id.clone(), SessionInput::Canonical(session.clone()));
        self.current = Some(session.id.clone());
        tracing::debug!(session_id = %session.id, "Created session");
        session
    }

    /// Resolve a session by id, normalizing the stored value
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::SessionNotFound` if no entry has this key.
    pub fn get(&self, id: &str) -> Result<Session> {
        let input = self
            .entries
            .get(id)
            .ok_or_else(|| ParleyError::SessionNotFound(id.to_string()))?;
        Ok(resolve(id, input.clone()))
    }

    /// Make `id` the current session and write back its repaired value
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::SessionNotFound` if no entry has this key; the
    /// current pointer is left unchanged in that case.
    pub fn set_current(&mut self, id: &str) -> Result<Session> {
        let session = self.get(id)?;
        self.entries
            .insert(id.to_string(), SessionInput::Canonical(session.clone()));
        self.current = Some(id.to_string());
        Ok(session)
    }

    /// Id of the current session, if any
    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// The current session, repaired on read
    pub fn current(&self) -> Option<Session> {
        self.current.as_deref().and_then(|id| self.get(id).ok())
    }

    /// Re-normalize every entry and repair the current pointer in one pass
    ///
    /// After this call every entry is canonical, the pointer refers to a
    /// stored session, and the store holds at least one session.
    pub fn validate(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        self.entries = entries
            .into_iter()
            .map(|(key, input)| {
                let session = resolve(&key, input);
                (key, SessionInput::Canonical(session))
            })
            .collect();

        if self.entries.is_empty() {
            tracing::debug!("Session store empty, synthesizing a session");
            self.create(UNTITLED);
            return;
        }

        let pointer_valid = self
            .current
            .as_ref()
            .map(|id| self.entries.contains_key(id))
            .unwrap_or(false);
        if !pointer_valid {
            let replacement = self.most_recent_id();
            if let Some(old) = &self.current {
                tracing::warn!(
                    "Current session {} is missing, moving to {:?}",
                    old,
                    replacement
                );
            }
            self.current = replacement;
        }
    }

    /// Store a raw value under `key` without touching the current pointer
    ///
    /// The value is repaired on every read until the next `validate` or
    /// `set_current` writes back its canonical form; fields the normalizer
    /// has to invent, such as a missing timestamp, may differ between those
    /// reads.
    pub fn insert_raw(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), SessionInput::Raw(value));
    }

    /// Normalize `session` and store it under its own id
    ///
    /// Returns the stored, canonical value.
    pub fn put(&mut self, session: Session) -> Session {
        let normalized = normalize_session(session);
        self.entries.insert(
            normalized.id.clone(),
            SessionInput::Canonical(normalized.clone()),
        );
        normalized
    }

    /// Remove a session; the store is re-validated afterwards
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::SessionNotFound` if no entry has this key.
    pub fn remove(&mut self, id: &str) -> Result<Session> {
        let input = self
            .entries
            .remove(id)
            .ok_or_else(|| ParleyError::SessionNotFound(id.to_string()))?;
        let removed = resolve(id, input);
        self.validate();
        Ok(removed)
    }

    /// Summaries ordered by most recent activity first
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut rows: Vec<SessionSummary> = self
            .entries
            .iter()
            .map(|(key, input)| {
                let s = resolve(key, input.clone());
                SessionSummary {
                    id: s.id,
                    title: s.title,
                    message_count: s.messages.len(),
                    last_activity: s.last_activity,
                    has_error: s.error.is_some(),
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.id.cmp(&b.id))
        });
        rows
    }

    /// Canonical `{ session_id: Session }` document
    pub fn to_document(&self) -> Result<Value> {
        let mut map = serde_json::Map::new();
        for (key, input) in &self.entries {
            map.insert(key.clone(), serde_json::to_value(resolve(key, input.clone()))?);
        }
        Ok(Value::Object(map))
    }

    /// Number of stored sessions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no session is stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when a session with this id is stored
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn most_recent_id(&self) -> Option<String> {
        self.list().into_iter().next().map(|row| row.id)
    }
}

fn resolve(key: &str, input: SessionInput) -> Session {
    let mut session = normalize_session(input);
    if session.id != key {
        session.id = key.to_string();
    }
    session
}
