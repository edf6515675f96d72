use color_eyre::Result;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

mod generate;

/// Represents the final outcome of a [Process] execution
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Whether the process failed
    pub failed: bool,
    /// Content to be written to the standard output
    pub stdout: Option<String>,
    /// Content to be written to the standard error
    pub stderr: Option<String>,
}

impl ProcessOutput {
    /// Creates a new successful output
    pub fn success() -> Self {
        Self::default()
    }

    /// Creates a new failed output
    pub fn fail() -> Self {
        Self {
            failed: true,
            ..Default::default()
        }
    }

    /// Sets the content of the standard output
    pub fn stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    /// Sets the content of the standard error
    pub fn stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = Some(stderr.into());
        self
    }
}

/// A process executed from the command line
#[trait_variant::make(Send)]
pub trait Process {
    /// Executes the process, honoring the cancellation token
    async fn execute(self, config: Config, cancellation_token: CancellationToken) -> Result<ProcessOutput>;
}
