use super::{Checkpoint, CheckpointError};
use async_trait::async_trait;

/// A component whose state is written into checkpoints
///
/// The service calls the three phases in order on every registered
/// component: `start_checkpoint` on all, then `do_checkpoint` on all, then
/// `finish_checkpoint` on all. An error in either of the first two phases
/// fails the checkpoint; `finish_checkpoint` still runs.
#[async_trait]
pub trait Checkpointable: Send + Sync {
    /// Name used for this component's files in a checkpoint directory
    fn checkpoint_name(&self) -> &str;

    /// Acquires whatever the component needs held while it is written
    async fn start_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Writes the component's state into the checkpoint directory
    async fn do_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Releases what `start_checkpoint` acquired
    async fn finish_checkpoint(&self, checkpoint: &Checkpoint);

    /// Restores state from `checkpoint`; called before the crawl starts
    async fn set_recovery_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}
