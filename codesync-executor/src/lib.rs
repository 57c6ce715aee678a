#![deny(clippy::all)]

pub mod config;
pub mod lang;
pub mod local;
pub mod orchestrator;
pub mod process;
pub mod queue;
pub mod sandbox;
pub mod workspace;

mod measure;
mod signal;
mod verdict;

pub use self::config::Config;
pub use self::orchestrator::Orchestrator;
pub use self::queue::{AdmissionQueue, Job};

pub use codesync_protocol::common::{ExecutionRequest, ExecutionResult, Verdict};
pub use codesync_protocol::error::ExecError;

use self::process::HostRunner;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

/// Builds an orchestrator on the host runner and probes the container sandbox.
pub async fn init(config: &Config) -> Result<Orchestrator> {
    let mut orchestrator = Orchestrator::new(config, Arc::new(HostRunner))?;
    if config.executor.queue_fallback {
        let max_concurrent = config.executor.max_concurrent as usize;
        info!(max_concurrent, "admission queue enabled for local execution");
        orchestrator = orchestrator.with_queue(AdmissionQueue::new(max_concurrent));
    }
    orchestrator.init().await;
    Ok(orchestrator)
}
