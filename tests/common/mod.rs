use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley::backend::{
    AdapterKind, BackendAdapter, BackendReply, BackendRequest, Backends, ResilientBackend,
};
use parley::config::SessionConfig;
use parley::resilience::{CircuitBreaker, ResiliencePolicy, RetryPolicy};
use parley::{ChatService, JsonFileStorage, ParleyError, SessionStore};
use tempfile::TempDir;

/// Adapter that answers from a fixed list and records every request
#[allow(dead_code)]
pub struct StubAdapter {
    kind: AdapterKind,
    replies: Mutex<VecDeque<Result<BackendReply, ParleyError>>>,
    requests: Mutex<Vec<BackendRequest>>,
}

#[allow(dead_code)]
impl StubAdapter {
    pub fn new(kind: AdapterKind, replies: Vec<Result<BackendReply, ParleyError>>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendAdapter for StubAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    async fn send(&self, request: &BackendRequest) -> parley::Result<BackendReply> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(err)) => Err(err.into()),
            None => Err(ParleyError::Backend("no stubbed reply left".into()).into()),
        }
    }
}

/// Wrap an adapter with a quick policy: `retries` retries with a 1ms delay
#[allow(dead_code)]
pub fn quick_backend(
    adapter: Arc<dyn BackendAdapter>,
    retries: u32,
    threshold: u32,
) -> ResilientBackend {
    ResilientBackend::new(
        adapter,
        ResiliencePolicy::new(
            RetryPolicy::new(retries, Duration::from_millis(1), 2.0),
            CircuitBreaker::new("integration", threshold, Duration::from_secs(60)),
        ),
        Duration::from_secs(10),
    )
}

/// A service over an in-memory store with the given adapters
#[allow(dead_code)]
pub fn service_with(
    streaming: Arc<dyn BackendAdapter>,
    direct: Arc<dyn BackendAdapter>,
) -> ChatService {
    ChatService::new(
        Backends::new(quick_backend(streaming, 0, 5), quick_backend(direct, 0, 5)),
        SessionConfig::default(),
        SessionStore::new(),
    )
}

#[allow(dead_code)]
pub fn create_temp_storage() -> (JsonFileStorage, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let storage = JsonFileStorage::new_with_path(tmp.path().join("sessions.json"))
        .expect("failed to create json storage with path");
    (storage, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
