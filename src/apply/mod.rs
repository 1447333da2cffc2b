//! Apply pipeline: render the topology, then reload the proxy
//!
//! Both steps run in order and a render failure skips the reload. Nothing
//! is transactional: if the reload fails the output file already holds the
//! new configuration.

mod reload;
mod render;
mod retry;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::options::GeneratorOptions;
use crate::topology::TopologySnapshot;

pub use reload::{ReloadCommand, ReloadError};
pub use render::{RenderError, TemplateRenderer};
pub use retry::{calculate_backoff, RetryPolicy};

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("an error occurred while rendering template: {0}")]
    Render(#[from] RenderError),

    #[error("an error occurred while reloading the proxy: {0}")]
    Reload(#[from] ReloadError),
}

impl ApplyError {
    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ApplyError::Render(_) => "render_failed",
            ApplyError::Reload(_) => "reload_failed",
        }
    }
}

/// Publishes a topology snapshot to the external proxy
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn apply(&self, snapshot: &TopologySnapshot) -> Result<(), ApplyError>;
}

/// Renders the proxy template and runs the reload command.
///
/// Several clusters share one output file, so applies are serialized.
pub struct TemplatePublisher {
    renderer: TemplateRenderer,
    reload: ReloadCommand,
    lock: Mutex<()>,
}

impl TemplatePublisher {
    pub fn new(renderer: TemplateRenderer, reload: ReloadCommand) -> Self {
        Self {
            renderer,
            reload,
            lock: Mutex::new(()),
        }
    }

    pub fn from_options(opts: &GeneratorOptions) -> Self {
        Self::new(
            TemplateRenderer::new(&opts.template_input_file, &opts.template_output_file),
            ReloadCommand::new(
                opts.reload_program.clone(),
                opts.reload_args.clone(),
                opts.reload_timeout,
            ),
        )
    }
}

#[async_trait]
impl Publisher for TemplatePublisher {
    async fn apply(&self, snapshot: &TopologySnapshot) -> Result<(), ApplyError> {
        let _guard = self.lock.lock().await;

        self.renderer.render(snapshot).await?;
        self.reload.run().await?;

        info!(
            "Proxy reloaded with {} rendered from {} cluster(s)",
            self.renderer.output().display(),
            snapshot.clusters.len()
        );
        Ok(())
    }
}
