//! Template rendering step of the apply pipeline

use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior};
use thiserror::Error;
use tracing::debug;

use crate::topology::TopologySnapshot;

#[derive(Error, Debug)]
pub enum RenderError {
    /// Template file missing or unreadable
    #[error("failed to read template {path}: {source}")]
    ReadTemplate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Template syntax or execution error (including undefined fields)
    #[error("failed to execute template: {0}")]
    Template(#[from] minijinja::Error),

    /// Output path not writable
    #[error("failed to write rendered output {path}: {source}")]
    WriteOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Renders a snapshot through a template file into an output file
#[derive(Clone, Debug)]
pub struct TemplateRenderer {
    input: PathBuf,
    output: PathBuf,
}

impl TemplateRenderer {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Render a template source against a snapshot
    pub fn render_str(source: &str, snapshot: &TopologySnapshot) -> Result<String, RenderError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        Ok(env.render_str(source, snapshot)?)
    }

    /// Read the template, render it and replace the output file.
    ///
    /// The result is written next to the output first and then renamed over
    /// it, so readers never see a partially written file.
    pub async fn render(&self, snapshot: &TopologySnapshot) -> Result<(), RenderError> {
        let source = tokio::fs::read_to_string(&self.input)
            .await
            .map_err(|source| RenderError::ReadTemplate {
                path: self.input.clone(),
                source,
            })?;

        let rendered = Self::render_str(&source, snapshot)?;

        let staging = staging_path(&self.output);
        let write_err = |source| RenderError::WriteOutput {
            path: self.output.clone(),
            source,
        };
        tokio::fs::write(&staging, rendered.as_bytes())
            .await
            .map_err(write_err)?;
        tokio::fs::rename(&staging, &self.output)
            .await
            .map_err(write_err)?;

        debug!(
            "Rendered {} into {} ({} bytes)",
            self.input.display(),
            self.output.display(),
            rendered.len()
        );
        Ok(())
    }
}

fn staging_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    output.with_file_name(name)
}
