//! # Run-loop configuration.
//!
//! [`Config`] defines how a scheduler drives the trampoline: the batch
//! threshold after which a synchronous chain is re-submitted as a fresh
//! runnable, and whether `run_async` is forced onto the scheduler even for
//! chains that could progress on the caller's thread.
//!
//! # Example
//! ```
//! use lazytask::Config;
//!
//! let mut cfg = Config::default();
//! cfg.batch_size = 256;
//!
//! assert!(!cfg.always_async);
//! ```

/// Configuration shared by scheduler implementations.
///
/// Controls trampoline batching and the initial execution policy.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Number of synchronous frames executed on one thread before the
    /// continuation is re-submitted to the scheduler.
    pub batch_size: u32,
    /// When true, `run_async` always submits to the scheduler instead of
    /// letting synchronous prefixes run on the caller's thread.
    pub always_async: bool,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `batch_size = 128`
    /// - `always_async = false`
    fn default() -> Self {
        Self {
            batch_size: 128,
            always_async: false,
        }
    }
}
