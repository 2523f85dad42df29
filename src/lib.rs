//! # Screenshot Rotator
//!
//! A bulk website screenshot tool that routes batches of captures through
//! rotating network egress identities (NordVPN or OpenVPN) and survives
//! interruption without losing completed work or duplicating effort.
//!
//! The engine accounts for every target exactly once across arbitrarily
//! many process restarts: progress is committed to a durable session file
//! after every batch, the success count is reconciled against the artifacts
//! actually on disk at resume, and a recorded success is never demoted by a
//! later failure within the same run.
//!
//! ## How a run proceeds
//!
//! 1. Targets (domains, URLs, IPs, CIDR ranges) are read from a file or
//!    stdin, deduplicated once, and matched against any existing session
//!    for the same (target-list, output-directory) pair.
//! 2. The remaining queue is sliced into batches. With an egress mode
//!    active, the outbound identity is rotated (and confirmed changed)
//!    before each batch.
//! 3. Each batch is dispatched to a bounded worker pool; workers try the
//!    secure scheme first and report back over a channel. The scheduler is
//!    the only writer of session state.
//! 4. Failed targets can be retried in dedicated passes with their own
//!    durable session, until the failed set empties or the operator stops.
//! 5. A run with at least one success ends with an HTML gallery report
//!    (and optionally a metadata CSV).
//!
//! ## CLI Usage
//!
//! ```bash
//! # 25 targets per NordVPN identity, 8 capture workers
//! screenshot-rotator -t domains.txt -o shots/ --egress nordvpn -n 25 -w 8 --timeout 20
//!
//! # No rotation, metadata CSV, targets piped in
//! cat domains.txt | screenshot-rotator -o shots/ --csv
//! ```

/// Configuration and settings for the rotator
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Target normalization (domains, IPs, CIDR ranges to candidate URLs)
pub mod normalizer;

/// Durable, resumable session state
pub mod session;

/// File-backed domain/operational error channels
pub mod sinks;

/// Interactive confirmation prompts
pub mod prompt;

/// Egress identity providers and the rotation controller
pub mod egress;

/// Browser pool management for concurrent Chrome instances
pub mod browser_pool;

/// The capture operation and its Chrome-backed engine
pub mod capture;

/// Batch scheduling over the bounded worker pool
pub mod scheduler;

/// Retry coordination over previously failed targets
pub mod retry;

/// HTML gallery and CSV metadata reports
pub mod report;

/// Run counters and timings
pub mod metrics;

/// Command-line interface implementation
pub mod cli;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod tests;

pub use browser_pool::*;
pub use capture::*;
pub use cli::*;
pub use config::*;
pub use egress::*;
pub use error::*;
pub use metrics::*;
pub use normalizer::*;
pub use prompt::*;
pub use report::*;
pub use retry::*;
pub use scheduler::*;
pub use session::*;
pub use sinks::*;
pub use utils::*;
