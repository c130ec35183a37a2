//! Game ingestion for rook.
//!
//! Pulls a player's games from remote platforms (or uploaded PGN), drops
//! the ones already stored, writes the rest with their scores in small
//! batches, and advances the player's sync cursor.
//!
//! The main entry points are [`ImportOrchestrator`] for running a job in
//! the current task and [`JobRegistry`] for running jobs in the background.

pub mod config;
pub mod cursor;
pub mod dedup;
pub mod error;
pub mod events;
pub mod fetch;
pub mod jobs;
pub mod limiter;
pub mod orchestrator;
pub mod progress;
pub mod source;
pub mod transport;
pub mod upload;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use events::{EventBus, ImportEvent};
pub use jobs::{JobId, JobRegistry, JobStatus, Retention};
pub use limiter::LimiterRegistry;
pub use orchestrator::{ImportIssue, ImportOrchestrator, ImportRequest, ImportSummary, IssueKind};
pub use progress::{JobProgress, Phase, ProgressReporter};
pub use transport::ReqwestTransport;
