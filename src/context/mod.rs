//! Run-scoped shared state
//!
//! A [`Context`] is created for every test run and shared by all steps. It
//! holds three things:
//! 1. A keyed store of [`ContextValue`]s steps use to hand data to each other
//! 2. An append-only log of informational and error entries
//! 3. A registry of [`Disposable`] resources released when the run ends
//!
//! Every collection sits behind its own mutex, so concurrent steps can set
//! values and register resources at the same time.

mod disposal;
mod queue;
mod value;

pub use disposal::{Disposable, DisposableId, ReleaseFailure};
pub use queue::MessageQueue;
pub use value::ContextValue;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::common::{Error, Result};
use disposal::Registered;

/// Severity of a context log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One entry of the run log
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Time since the context was created
    pub elapsed: Duration,
}

/// Shared state for a single test run
pub struct Context {
    run_id: Uuid,
    started: Instant,
    values: Mutex<HashMap<String, ContextValue>>,
    disposables: Mutex<Vec<Registered>>,
    next_disposable: AtomicU64,
    log: Mutex<Vec<LogEntry>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument(
            "context key must not be empty".to_string(),
        ));
    }
    Ok(())
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started: Instant::now(),
            values: Mutex::new(HashMap::new()),
            disposables: Mutex::new(Vec::new()),
            next_disposable: AtomicU64::new(1),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Unique identifier of this run
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    // === Keyed values ===

    /// Store a value, replacing any previous value under the same key
    pub fn set(&self, key: &str, value: impl Into<ContextValue>) -> Result<()> {
        check_key(key)?;
        lock(&self.values).insert(key.to_string(), value.into());
        Ok(())
    }

    /// Look up a value; a missing key is `Ok(None)`
    pub fn get(&self, key: &str) -> Result<Option<ContextValue>> {
        check_key(key)?;
        Ok(lock(&self.values).get(key).cloned())
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        Ok(lock(&self.values).contains_key(key))
    }

    /// Remove a value and return it
    pub fn remove(&self, key: &str) -> Result<Option<ContextValue>> {
        check_key(key)?;
        Ok(lock(&self.values).remove(key))
    }

    pub fn get_text(&self, key: &str) -> Result<Option<String>> {
        match self.get(key)? {
            None => Ok(None),
            Some(ContextValue::Text(s)) => Ok(Some(s)),
            Some(other) => Err(Error::type_mismatch(key, "text", other.kind())),
        }
    }

    pub fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.get(key)? {
            None => Ok(None),
            Some(ContextValue::Bytes(b)) => Ok(Some(b)),
            Some(other) => Err(Error::type_mismatch(key, "bytes", other.kind())),
        }
    }

    pub fn get_integer(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key)? {
            None => Ok(None),
            Some(ContextValue::Integer(i)) => Ok(Some(i)),
            Some(other) => Err(Error::type_mismatch(key, "integer", other.kind())),
        }
    }

    pub fn get_queue(&self, key: &str) -> Result<Option<MessageQueue>> {
        match self.get(key)? {
            None => Ok(None),
            Some(ContextValue::Queue(q)) => Ok(Some(q)),
            Some(other) => Err(Error::type_mismatch(key, "queue", other.kind())),
        }
    }

    /// Bytes of any payload-like value (text, bytes, integer, boolean)
    pub fn get_payload(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.get(key)? {
            None => Ok(None),
            Some(value) => value
                .to_payload()
                .map(Some)
                .ok_or_else(|| Error::type_mismatch(key, "payload", value.kind())),
        }
    }

    // === Log ===

    pub fn log_info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(run = %self.run_id, "{}", message);
        self.append_log(LogLevel::Info, message);
    }

    pub fn log_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(run = %self.run_id, "{}", message);
        self.append_log(LogLevel::Error, message);
    }

    fn append_log(&self, level: LogLevel, message: String) {
        let entry = LogEntry {
            level,
            message,
            elapsed: self.started.elapsed(),
        };
        lock(&self.log).push(entry);
    }

    /// Snapshot of the log so far
    pub fn log_entries(&self) -> Vec<LogEntry> {
        lock(&self.log).clone()
    }

    // === Disposal ===

    /// Register a resource for release when the context is disposed
    pub fn register_disposable(&self, handle: Box<dyn Disposable>) -> DisposableId {
        let id = DisposableId(self.next_disposable.fetch_add(1, Ordering::SeqCst));
        tracing::debug!(run = %self.run_id, "Registered {} as {}", handle.describe(), id);
        lock(&self.disposables).push(Registered { id, handle });
        id
    }

    /// Number of resources still awaiting release
    pub fn pending_disposables(&self) -> usize {
        lock(&self.disposables).len()
    }

    /// Release every registered resource
    ///
    /// Resources are released in reverse registration order. A failing
    /// release does not stop the sweep; failures are logged and returned.
    /// The registry is drained, so a second call releases nothing.
    pub async fn dispose(&self) -> Vec<ReleaseFailure> {
        let registered = std::mem::take(&mut *lock(&self.disposables));
        let mut failures = Vec::new();

        for Registered { id, handle } in registered.into_iter().rev() {
            let resource = handle.describe();
            match handle.release().await {
                Ok(()) => self.log_info(format!("Released {}", resource)),
                Err(error) => {
                    self.log_error(format!("Failed to release {}: {}", resource, error));
                    failures.push(ReleaseFailure {
                        id,
                        resource,
                        error,
                    });
                }
            }
        }

        failures
    }
}
