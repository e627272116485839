//! Debug/step mode: pause at fixed checkpoints for manual inspection.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    SessionReady,
    BeforeExtraction,
    BlockDetected,
    RecordFinalized,
}

impl Checkpoint {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Checkpoint::SessionReady => "session_ready",
            Checkpoint::BeforeExtraction => "before_extraction",
            Checkpoint::BlockDetected => "block_detected",
            Checkpoint::RecordFinalized => "record_finalized",
        }
    }
}

#[async_trait]
pub trait StepGate: Send + Sync {
    /// Returns once the run may continue past `checkpoint`.
    async fn pause(&self, checkpoint: Checkpoint, detail: &str);
}

/// Never pauses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStepGate;

#[async_trait]
impl StepGate for NoopStepGate {
    async fn pause(&self, _checkpoint: Checkpoint, _detail: &str) {}
}

/// Waits for a line on stdin at every checkpoint. Concurrent workers queue
/// behind one prompt at a time.
#[derive(Debug, Default)]
pub struct StdinStepGate {
    prompt: Mutex<()>,
}

impl StdinStepGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepGate for StdinStepGate {
    async fn pause(&self, checkpoint: Checkpoint, detail: &str) {
        let _turn = self.prompt.lock().await;
        tracing::info!(checkpoint = checkpoint.as_str(), detail, "debug step: waiting for enter");
        eprintln!("[step] {} {detail} -- press enter to continue", checkpoint.as_str());

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = stdin.read_line(&mut line).await {
            tracing::warn!(error = %e, "could not read stdin; continuing");
        }
    }
}
