//! Recording and controllable collaborators.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tether_core::CompressionProvider;
use tether_core::CoordinationError;
use tether_core::EnsembleProvider;
use tether_core::Executor;
use tether_core::Result;
use tether_retry::RetrySleeper;

/// Ensemble provider whose connection string tests can change at will.
#[derive(Debug)]
pub struct MutableEnsembleProvider {
    connection_string: RwLock<String>,
    starts: AtomicUsize,
    closes: AtomicUsize,
}

impl MutableEnsembleProvider {
    /// Start with `connection_string`.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: RwLock::new(connection_string.into()),
            starts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Replace the connection string.
    pub fn set_connection_string(&self, connection_string: impl Into<String>) {
        *self.connection_string.write() = connection_string.into();
    }

    /// Number of `start` calls.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of `close` calls.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnsembleProvider for MutableEnsembleProvider {
    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn connection_string(&self) -> String {
        self.connection_string.read().clone()
    }
}

/// Records sleeps without sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Create a sleeper with an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every requested sleep, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl RetrySleeper for RecordingSleeper {
    async fn sleep_for(&self, duration: Duration) -> Result<()> {
        self.sleeps.lock().push(duration);
        Ok(())
    }
}

const COMPRESSED_PREFIX: &[u8] = b"compressed(";
const COMPRESSED_SUFFIX: &[u8] = b")";

/// Wraps payloads as `compressed(<data>)` and records every call.
#[derive(Debug, Default)]
pub struct RecordingCompressionProvider {
    compressed: Mutex<Vec<(String, Vec<u8>)>>,
    decompressed: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingCompressionProvider {
    /// Create a provider with an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// `(path, raw data)` of every compress call.
    pub fn compress_calls(&self) -> Vec<(String, Vec<u8>)> {
        self.compressed.lock().clone()
    }

    /// `(path, compressed data)` of every decompress call.
    pub fn decompress_calls(&self) -> Vec<(String, Vec<u8>)> {
        self.decompressed.lock().clone()
    }

    /// What `compress` produces for `data`.
    pub fn wrap(data: &[u8]) -> Vec<u8> {
        [COMPRESSED_PREFIX, data, COMPRESSED_SUFFIX].concat()
    }
}

impl CompressionProvider for RecordingCompressionProvider {
    fn compress(&self, path: &str, data: &[u8]) -> Result<Vec<u8>> {
        self.compressed.lock().push((path.to_string(), data.to_vec()));
        Ok(Self::wrap(data))
    }

    fn decompress(&self, path: &str, data: &[u8]) -> Result<Vec<u8>> {
        self.decompressed.lock().push((path.to_string(), data.to_vec()));
        data.strip_prefix(COMPRESSED_PREFIX)
            .and_then(|rest| rest.strip_suffix(COMPRESSED_SUFFIX))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| CoordinationError::Compression {
                path: path.to_string(),
                reason: "payload was not produced by RecordingCompressionProvider".to_string(),
            })
    }
}

/// Holds submitted tasks until the test runs them.
#[derive(Default)]
pub struct DeferredExecutor {
    tasks: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl std::fmt::Debug for DeferredExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredExecutor").field("pending", &self.pending()).finish()
    }
}

impl DeferredExecutor {
    /// Create an executor with no pending tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run every pending task to completion, in submission order, including
    /// tasks submitted while running.
    pub async fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch = std::mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                return ran;
            }
            for task in batch {
                task.await;
                ran += 1;
            }
        }
    }
}

impl Executor for DeferredExecutor {
    fn execute(&self, task: BoxFuture<'static, ()>) {
        self.tasks.lock().push(task);
    }
}
