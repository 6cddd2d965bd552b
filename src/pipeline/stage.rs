//! Long-running stage trait
//!
//! Handlers process one packet at a time inside a `Pipeline`; a stage is
//! the task that owns pipelines and drives them, such as a stream worker.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for tasks that drive pipelines until shutdown
#[async_trait]
pub trait PipelineStage: Send {
    /// Run the stage, processing data until shutdown signal
    async fn run(&mut self) -> Result<()>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;

    /// Gracefully shutdown the stage
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
