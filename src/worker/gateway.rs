//! Single call surface over the supervised worker.
//!
//! The gateway wires the supervisor, the multiplexer, and the answer cache
//! into one `invoke(command, params)` entry point. Query commands consult
//! the cache first; store/delete/clear always go to the worker, and
//! delete/clear explicitly invalidate the cache entries they make stale.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;

use crate::cache::{AnswerCache, CacheKey, Scope, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
use crate::config::{Settings, SettingsError};

use super::error::{WorkerError, WorkerResult};
use super::mux::Multiplexer;
use super::protocol::{
    commands, params_object, DeleteParams, QueryParams, RequestEnvelope, StoreParams,
};
use super::supervisor::{Supervisor, SupervisorConfig, WorkerState};

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway construction parameters.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub supervisor: SupervisorConfig,
    /// Deadline for each dispatched call.
    pub call_timeout: Duration,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
}

impl GatewayConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            supervisor: SupervisorConfig::new(program, args),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            cache_enabled: true,
            cache_ttl: DEFAULT_TTL,
            cache_max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl GatewayConfig {
    /// Build a gateway config from loaded settings.
    ///
    /// Fails when the configured program references an environment
    /// variable that is not set.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let mut supervisor = SupervisorConfig::new(
            settings.worker.resolved_program()?,
            settings.worker.args.clone(),
        );
        supervisor.max_restarts = settings.worker.restart.max_restarts;
        supervisor.restart_window = Duration::from_secs(settings.worker.restart.window_seconds);
        supervisor.restart_delay = Duration::from_millis(settings.worker.restart.delay_ms);

        Ok(Self {
            supervisor,
            call_timeout: Duration::from_secs(settings.worker.timeout_seconds),
            cache_enabled: settings.cache.enabled,
            cache_ttl: Duration::from_secs(settings.cache.ttl_seconds),
            cache_max_entries: settings.cache.max_entries,
        })
    }
}

/// Owned facade over the worker: spawn once, inject where calls are made,
/// stop on shutdown. No ambient singletons.
pub struct WorkerGateway {
    supervisor: Supervisor,
    mux: Arc<Multiplexer>,
    cache: StdMutex<AnswerCache>,
    cache_enabled: bool,
    call_timeout: Duration,
}

impl WorkerGateway {
    /// Spawn the worker and return the gateway in `Starting` state.
    pub fn start(config: GatewayConfig) -> Self {
        let mux = Arc::new(Multiplexer::new());
        let supervisor = Supervisor::start(config.supervisor, mux.clone());

        Self {
            supervisor,
            mux,
            cache: StdMutex::new(AnswerCache::new(config.cache_ttl, config.cache_max_entries)),
            cache_enabled: config.cache_enabled,
            call_timeout: config.call_timeout,
        }
    }

    /// Spawn a gateway from loaded settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        Ok(Self::start(GatewayConfig::from_settings(settings)?))
    }

    /// Invoke a named command on the worker.
    ///
    /// Query commands are answered from the cache when possible; on a miss
    /// the successful result is stored. Delete and clear invalidate the
    /// cache entries they affect. Always eventually resolves: success,
    /// structured error, or timeout.
    pub async fn invoke(&self, command: &str, params: Map<String, Value>) -> WorkerResult<Value> {
        let cache_key = if self.cache_enabled && command == commands::QUERY {
            query_cache_key(&params)
        } else {
            None
        };

        if let Some(key) = &cache_key {
            let hit = self.lock_cache().get(key);
            if let Some(result) = hit {
                debug!(command, "answer served from cache");
                return Ok(result);
            }
        }

        let invalidate: Option<Option<Scope>> = match command {
            commands::DELETE => delete_scope(&params),
            commands::CLEAR_ALL => Some(None),
            _ => None,
        };

        let result = self.dispatch(command, params).await?;

        if let Some(scope) = invalidate {
            let mut cache = self.lock_cache();
            match scope {
                Some(scope) => {
                    let dropped = cache.invalidate_scope(&scope);
                    debug!(dropped, "invalidated cached answers for deleted scope");
                }
                None => cache.clear(),
            }
        }

        if let Some(key) = cache_key {
            self.lock_cache().put(key, result.clone());
        }

        Ok(result)
    }

    /// Dispatch one call: correlation id, pending registration, encoded
    /// write, awaited response with per-call timeout.
    async fn dispatch(&self, command: &str, params: Map<String, Value>) -> WorkerResult<Value> {
        match self.supervisor.state() {
            WorkerState::Ready => {}
            WorkerState::Exhausted => return Err(WorkerError::RestartBudgetExhausted),
            _ => return Err(WorkerError::NotReady),
        }

        let (id, rx) = self.mux.register();
        let envelope = RequestEnvelope {
            request_id: id,
            command: command.to_string(),
            params,
        };

        let line = match envelope.encode() {
            Ok(line) => line,
            Err(err) => {
                self.mux.remove(id);
                return Err(err);
            }
        };
        if let Err(err) = self.supervisor.write_line(&line).await {
            self.mux.remove(id);
            return Err(err);
        }

        let response = match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(finalized)) => finalized?,
            // Sender dropped without resolving; only possible if the
            // pending table itself went away with the supervisor.
            Ok(Err(_)) => return Err(WorkerError::WorkerCrashed),
            Err(_) => {
                self.mux.remove(id);
                return Err(WorkerError::Timeout(self.call_timeout.as_secs()));
            }
        };

        if response.success {
            Ok(response.into_result())
        } else {
            let message = response
                .error
                .unwrap_or_else(|| "unknown worker error".to_string());
            Err(WorkerError::worker(message))
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, AnswerCache> {
        self.cache.lock().expect("answer cache lock poisoned")
    }

    /// Current worker state.
    pub fn state(&self) -> WorkerState {
        self.supervisor.state()
    }

    /// Wait until the worker accepts calls, up to `timeout`.
    pub async fn wait_until_ready(&self, timeout: Duration) -> WorkerResult<()> {
        self.supervisor.wait_until_ready(timeout).await
    }

    /// Leave the `Exhausted` state and try the worker again.
    pub fn reset(&self) {
        self.supervisor.reset();
    }

    /// Terminate the worker. Idempotent; pending calls fail `NotReady`.
    pub async fn stop(&self) {
        self.supervisor.stop().await;
    }

    /// Number of cached answers (expired entries may still be counted).
    pub fn cached_answers(&self) -> usize {
        self.lock_cache().len()
    }

    /// Number of calls currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.mux.in_flight()
    }
}

// Convenience methods for the commands the worker understands.
impl WorkerGateway {
    /// Store extracted document text in the vector store.
    pub async fn store_document(&self, params: StoreParams) -> WorkerResult<Value> {
        self.invoke(commands::STORE, params_object(&params)?).await
    }

    /// Ask a question, scoped to one document or global.
    pub async fn query_question(&self, params: QueryParams) -> WorkerResult<Value> {
        self.invoke(commands::QUERY, params_object(&params)?).await
    }

    /// Remove a document's vectors and its cached answers.
    pub async fn delete_document(&self, document_id: &str) -> WorkerResult<Value> {
        let params = DeleteParams {
            document_id: document_id.to_string(),
        };
        self.invoke(commands::DELETE, params_object(&params)?).await
    }

    /// Wipe the whole vector store and the answer cache.
    pub async fn clear_all(&self) -> WorkerResult<Value> {
        self.invoke(commands::CLEAR_ALL, Map::new()).await
    }
}

/// Derive the cache key for a query, when its params allow one.
fn query_cache_key(params: &Map<String, Value>) -> Option<CacheKey> {
    let question = params.get("question")?.as_str()?;
    let scope = Scope::from_document_id(
        params
            .get("document_id")
            .and_then(|id| id.as_str()),
    );
    Some(CacheKey::new(scope, question))
}

/// Scope invalidated by a delete command. `Some(None)` would mean "all";
/// delete always names one document.
fn delete_scope(params: &Map<String, Value>) -> Option<Option<Scope>> {
    let id = params.get("document_id")?.as_str()?;
    Some(Some(Scope::Document(id.to_string())))
}
