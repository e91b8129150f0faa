//! Chat send pipeline
//!
//! [`ChatService`] owns the session store and both backends. It is built
//! once by the entry point and shared by reference; nothing here is a
//! process-wide global.
//!
//! A send appends the user message and an in-progress assistant placeholder
//! before the backend is called, so progress is visible while the call runs.
//! On completion the placeholder is replaced by the reply, or removed when
//! the call failed. At most one send per session is in flight at a time.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Mutex as AsyncMutex;

use crate::backend::{BackendReply, BackendRequest, Backends};
use crate::config::{Config, SessionConfig};
use crate::error::{ParleyError, Result};
use crate::session::{
    now_timestamp, title_from_prompt, Message, ProcessingStep, Session, SessionStore,
    SessionSummary,
};
use crate::storage::JsonFileStorage;

/// Result of one send
#[derive(Debug)]
pub struct SendOutcome {
    /// The session as stored after the send completed
    pub session: Session,
    /// The backend reply, or the failure that was attached to the session
    pub reply: std::result::Result<BackendReply, ParleyError>,
}

impl SendOutcome {
    /// True when the backend produced a reply without reporting an error
    pub fn is_success(&self) -> bool {
        matches!(&self.reply, Ok(reply) if !reply.is_error())
    }
}

/// Session management and the send pipeline
pub struct ChatService {
    store: AsyncMutex<SessionStore>,
    backends: Backends,
    settings: SessionConfig,
    storage: Option<JsonFileStorage>,
    in_flight: Mutex<HashSet<String>>,
    progress: Mutex<HashMap<String, Vec<ProcessingStep>>>,
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("backends", &self.backends)
            .field("settings", &self.settings)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

/// Marks a session as having a send in flight until dropped
struct InFlightGuard<'a> {
    service: &'a ChatService,
    session_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(&self.service.in_flight).remove(&self.session_id);
        lock(&self.service.progress).remove(&self.session_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChatService {
    /// Create a service over an in-memory store
    pub fn new(backends: Backends, settings: SessionConfig, mut store: SessionStore) -> Self {
        store.validate();
        Self {
            store: AsyncMutex::new(store),
            backends,
            settings,
            storage: None,
            in_flight: Mutex::new(HashSet::new()),
            progress: Mutex::new(HashMap::new()),
        }
    }

    /// Persist the store to `storage` after every mutation
    pub fn with_storage(mut self, storage: JsonFileStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Build backends and storage from configuration and load the store
    ///
    /// # Errors
    ///
    /// Returns an error if a backend cannot be built or the session document
    /// cannot be read
    pub fn from_config(config: &Config) -> Result<Self> {
        let backends = Backends::from_config(config)?;
        let storage = JsonFileStorage::from_config(config.storage.path.as_deref())?;
        let store = storage.load()?;
        tracing::info!(
            sessions = store.len(),
            "Loaded sessions from {}",
            storage.path().display()
        );
        Ok(Self::new(backends, config.session.clone(), store).with_storage(storage))
    }

    /// Create a session and make it current
    pub async fn create_session(&self, title: &str) -> Session {
        let mut store = self.store.lock().await;
        let session = store.create(title);
        store.validate();
        self.persist(&mut store);
        tracing::info!(session_id = %session.id, "Created session");
        session
    }

    /// Make `id` the current session
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::SessionNotFound` if no such session exists
    pub async fn select_session(&self, id: &str) -> Result<Session> {
        let mut store = self.store.lock().await;
        let session = store.set_current(id)?;
        store.validate();
        self.persist(&mut store);
        Ok(session)
    }

    /// The current session; the store is never empty
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::SessionNotFound` only if the store could not be
    /// repaired, which validation rules out
    pub async fn current_session(&self) -> Result<Session> {
        let mut store = self.store.lock().await;
        store.validate();
        store
            .current()
            .ok_or_else(|| ParleyError::SessionNotFound("current".into()).into())
    }

    /// Look up a session by id
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::SessionNotFound` if no such session exists
    pub async fn get_session(&self, id: &str) -> Result<Session> {
        self.store.lock().await.get(id)
    }

    /// Summaries ordered by most recent activity first
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut store = self.store.lock().await;
        store.validate();
        store.list()
    }

    /// Delete a session
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::SessionNotFound` if no such session exists, or
    /// `ParleyError::SendInProgress` while a send for it is running
    pub async fn remove_session(&self, id: &str) -> Result<Session> {
        // A send marks itself in flight before it waits for the store, so the
        // check is only conclusive while the store lock is held.
        let mut store = self.store.lock().await;
        if lock(&self.in_flight).contains(id) {
            return Err(ParleyError::SendInProgress(id.to_string()).into());
        }
        let removed = store.remove(id)?;
        self.persist(&mut store);
        tracing::info!(session_id = %id, "Removed session");
        Ok(removed)
    }

    /// Progress steps of the send currently running for `session_id`
    ///
    /// Empty when no send is running.
    pub fn processing_steps(&self, session_id: &str) -> Vec<ProcessingStep> {
        lock(&self.progress)
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Send `prompt` on a session through the selected adapter
    ///
    /// Backend failures do not fail this call: they are attached to the
    /// session's `error` field and returned in [`SendOutcome::reply`].
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Validation` for an empty or oversized prompt,
    /// `ParleyError::SessionNotFound` for an unknown session, and
    /// `ParleyError::SendInProgress` while another send for the same session
    /// is running. No state changes in these cases.
    pub async fn send(
        &self,
        session_id: &str,
        prompt: &str,
        use_streaming: bool,
    ) -> Result<SendOutcome> {
        self.validate_prompt(prompt)?;
        let _guard = self.begin(session_id)?;
        let backend = self.backends.select(use_streaming);

        let (request, placeholder_id) = {
            let mut store = self.store.lock().await;
            let mut session = store.get(session_id)?;

            if session.has_pending_reply() {
                tracing::warn!(session_id, "Dropping stale in-progress reply");
                session.messages.retain(|m| !m.in_progress);
            }

            let history: Vec<Message> = session.messages.clone();
            let correlation = if use_streaming {
                session.backend_correlation_id.clone()
            } else {
                None
            };

            self.record_step(session_id, "user_message", "Recorded user message");
            session.messages.push(Message::user(prompt));
            let placeholder = Message::placeholder();
            let placeholder_id = placeholder.id.clone();
            session.messages.push(placeholder);
            session.error = None;
            store.put(session);
            store.validate();
            self.persist(&mut store);

            let request = BackendRequest::new(prompt)
                .with_correlation(correlation)
                .with_history(history);
            (request, placeholder_id)
        };

        self.record_step(
            session_id,
            "backend_call",
            &format!("Calling {} backend", backend.kind()),
        );
        tracing::info!(session_id, adapter = %backend.kind(), "Sending prompt");
        let result = backend.send(&request).await;

        let mut store = self.store.lock().await;
        let mut session = store.get(session_id)?;
        let reply = match result {
            Ok(reply) => {
                self.record_step(session_id, "reply", "Received reply");
                self.complete(&mut session, &placeholder_id, &reply, use_streaming);
                Ok(reply)
            }
            Err(err) => {
                let err = ParleyError::from_anyhow(err);
                tracing::error!(session_id, "Send failed: {}", err);
                session.messages.retain(|m| m.id != placeholder_id);
                session.error = Some(err.to_string());
                Err(err)
            }
        };

        let session = store.put(session);
        store.validate();
        self.persist(&mut store);
        Ok(SendOutcome { session, reply })
    }

    fn validate_prompt(&self, prompt: &str) -> Result<()> {
        if prompt.trim().is_empty() {
            return Err(ParleyError::Validation("Prompt cannot be empty".into()).into());
        }
        let chars = prompt.chars().count();
        if chars > self.settings.max_prompt_chars {
            return Err(ParleyError::Validation(format!(
                "Prompt is {} characters; the limit is {}",
                chars, self.settings.max_prompt_chars
            ))
            .into());
        }
        Ok(())
    }

    fn begin(&self, session_id: &str) -> Result<InFlightGuard<'_>> {
        if !lock(&self.in_flight).insert(session_id.to_string()) {
            return Err(ParleyError::SendInProgress(session_id.to_string()).into());
        }
        Ok(InFlightGuard {
            service: self,
            session_id: session_id.to_string(),
        })
    }

    fn record_step(&self, session_id: &str, kind: &str, message: &str) {
        tracing::debug!(session_id, step = kind, "{}", message);
        lock(&self.progress)
            .entry(session_id.to_string())
            .or_default()
            .push(ProcessingStep::new(kind, message));
    }

    fn complete(
        &self,
        session: &mut Session,
        placeholder_id: &str,
        reply: &BackendReply,
        use_streaming: bool,
    ) {
        let mut message = Message::assistant(reply.text.clone());
        message.metadata = reply.metadata.clone();
        match session.messages.iter_mut().find(|m| m.id == placeholder_id) {
            Some(slot) => {
                message.id = slot.id.clone();
                *slot = message;
            }
            None => session.messages.push(message),
        }

        if use_streaming {
            if let Some(token) = &reply.new_correlation {
                session.backend_correlation_id = Some(token.clone());
            }
        }

        match &reply.error {
            Some(error) => {
                session.error = Some(error.clone());
            }
            None => {
                session.error = None;
                session.last_activity = now_timestamp();
                if session.is_untitled() {
                    if let Some(first) = session.first_user_message() {
                        session.title = title_from_prompt(&first.content, self.settings.title_max_chars);
                    }
                }
            }
        }
    }

    fn persist(&self, store: &mut SessionStore) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save(store) {
                tracing::warn!("Failed to persist sessions: {:#}", e);
            }
        }
    }
}
