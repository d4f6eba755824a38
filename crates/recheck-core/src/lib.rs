//! recheck core - parallel verification & recovery pipeline
//!
//! Drives an external compiler over a directory of generated artifacts:
//! - Compiles everything concurrently with a hard per-artifact timeout
//! - Retries failures once
//! - Regenerates what still fails through a generation service
//! - Re-verifies and rolls back anything that is still broken
//! - Writes one log per attempt and a JSON run summary
//!
//! # Example
//!
//! ```rust,ignore
//! use recheck_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::new().with_artifact_dir("Blocks").with_workers(8);
//! let compiler = Arc::new(ProcessCompiler::from_config(&config));
//! let summary = Pipeline::new(config, compiler).run().await?;
//!
//! println!("{}/{} verified", summary.success_count, summary.total);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod generation;
pub mod invoker;
pub mod pipeline;
pub mod pool;
pub mod report;
pub mod retry;
pub mod rollback;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use backoff::{Backoff, Sleeper, TokioSleeper};
pub use config::{
    run_logs_dir, CommandTemplate, GenerationConfig, PipelineConfig, SecondPassScope,
};
pub use error::{ConfigError, GenerationError, PipelineError, PipelineResult, StoreError};
pub use events::{ChannelObserver, NoopObserver, ProgressEvent, ProgressObserver, TracingObserver};
pub use generation::{
    ContentSource, GenerationRequest, GenerationService, RegenerationGateway, RegenerationOutcome,
};
pub use invoker::{Compiler, ProcessCompiler};
pub use pipeline::Pipeline;
pub use pool::WorkerPool;
pub use report::{Classification, RegenerationError, ResultAggregator, RunSummary};
pub use retry::{RetryManager, RetryOutcome};
pub use rollback::{RollbackManager, RollbackReport};
pub use store::ArtifactStore;
pub use types::{
    Artifact, ArtifactId, AttemptLabel, BuildMetrics, BuildOutcome, BuildRecord, BuildResult,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with recheck
    pub use crate::{
        Artifact, ArtifactId, AttemptLabel, BuildOutcome, BuildResult, Compiler,
        GenerationService, Pipeline, PipelineConfig, ProcessCompiler, RunSummary,
        SecondPassScope,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
