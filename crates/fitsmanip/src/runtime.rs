//! Worker pool handle for the data-parallel pixel kernels.
//!
//! Every kernel takes a `&Runtime`; the convenience methods on
//! [`DoubleImage`](crate::DoubleImage) use [`Runtime::global`], built once
//! from [`RuntimeConfig::from_env`]. Cancellation is cooperative: kernels
//! call [`Runtime::check`] at chunk boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use once_cell::sync::OnceCell;
use rayon::prelude::*;

use crate::error::{Error, Result};

/// Environment variable overriding the worker count.
pub const THREADS_ENV: &str = "FITSMANIP_THREADS";

/// Pixels handed to one parallel task.
pub(crate) const CHUNK: usize = 16 * 1024;

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeConfig {
    /// Number of workers; 0 means one per online CPU.
    pub threads: usize,
}

impl RuntimeConfig {
    /// Read [`THREADS_ENV`]; a missing or unparsable value gives the default.
    pub fn from_env() -> Self {
        match std::env::var(THREADS_ENV) {
            Ok(v) => match v.trim().parse::<usize>() {
                Ok(threads) => RuntimeConfig { threads },
                Err(_) => {
                    warn!("ignoring {THREADS_ENV}={v:?}: not a thread count");
                    RuntimeConfig::default()
                }
            },
            Err(_) => RuntimeConfig::default(),
        }
    }
}

/// A worker pool plus a shared cancel flag.
#[derive(Clone)]
pub struct Runtime {
    pool: Arc<rayon::ThreadPool>,
    cancel: Arc<AtomicBool>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("threads", &self.threads())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

static GLOBAL: OnceCell<Runtime> = OnceCell::new();

impl Runtime {
    /// Build a new pool.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("fitsmanip-{i}"))
            .build()
            .map_err(|e| Error::Unsupported(format!("cannot start worker pool: {e}")))?;
        debug!("worker pool started with {} thread(s)", pool.current_num_threads());
        Ok(Runtime {
            pool: Arc::new(pool),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The process-wide runtime, created on first use.
    ///
    /// Initialisation is idempotent; concurrent first callers share one pool.
    pub fn global() -> Result<&'static Runtime> {
        GLOBAL.get_or_try_init(|| Runtime::new(RuntimeConfig::from_env()))
    }

    /// Install `config` as the global runtime if none exists yet.
    ///
    /// Returns the global runtime, which may predate this call.
    pub fn init_global(config: RuntimeConfig) -> Result<&'static Runtime> {
        GLOBAL.get_or_try_init(|| Runtime::new(config))
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside this pool so nested rayon iterators use its workers.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }

    /// Ask running kernels to stop at their next chunk boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Clear a previous cancellation.
    pub fn reset(&self) {
        self.cancel.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Apply `f` to every element in parallel, checking for cancellation
    /// before each chunk.
    pub fn map_in_place<T, F>(&self, data: &mut [T], f: F) -> Result<()>
    where
        T: Copy + Send + Sync,
        F: Fn(T) -> T + Sync + Send,
    {
        self.install(|| {
            data.par_chunks_mut(CHUNK).try_for_each(|chunk| {
                self.check()?;
                for v in chunk {
                    *v = f(*v);
                }
                Ok(())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_thread_count() {
        let rt = Runtime::new(RuntimeConfig { threads: 2 }).unwrap();
        assert_eq!(rt.threads(), 2);
    }

    #[test]
    fn install_runs_in_pool() {
        let rt = Runtime::new(RuntimeConfig { threads: 3 }).unwrap();
        let n = rt.install(rayon::current_num_threads);
        assert_eq!(n, 3);
        let sum: u64 = rt.install(|| (1..=100u64).into_par_iter().sum());
        assert_eq!(sum, 5050);
    }

    #[test]
    fn cancel_and_reset() {
        let rt = Runtime::new(RuntimeConfig { threads: 1 }).unwrap();
        assert!(rt.check().is_ok());
        rt.cancel();
        assert!(matches!(rt.check(), Err(Error::Cancelled)));
        // Clones share the flag.
        let other = rt.clone();
        assert!(other.is_cancelled());
        other.reset();
        assert!(!rt.is_cancelled());
    }

    #[test]
    fn map_in_place_visits_every_element() {
        let rt = Runtime::new(RuntimeConfig { threads: 2 }).unwrap();
        let mut data: Vec<u64> = (0..(3 * CHUNK as u64 + 7)).collect();
        rt.map_in_place(&mut data, |v| v * 2).unwrap();
        assert!(data.iter().enumerate().all(|(i, &v)| v == 2 * i as u64));
    }

    #[test]
    fn map_in_place_stops_when_cancelled() {
        let rt = Runtime::new(RuntimeConfig { threads: 1 }).unwrap();
        rt.cancel();
        let mut data = vec![1.0f64; 10];
        assert!(matches!(
            rt.map_in_place(&mut data, |v| v + 1.0),
            Err(Error::Cancelled)
        ));
        assert_eq!(data, vec![1.0; 10]);
    }

    #[test]
    fn global_is_idempotent() {
        let a = Runtime::global().unwrap() as *const Runtime;
        let b = Runtime::global().unwrap() as *const Runtime;
        assert_eq!(a, b);
    }

    #[test]
    fn default_config_is_automatic() {
        assert_eq!(RuntimeConfig::default().threads, 0);
    }
}
