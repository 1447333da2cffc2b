//! Error types for nginx-conf-generator

use thiserror::Error;

use crate::apply::ApplyError;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// A kubeconfig file could not be read or resolved
    #[error("Kubeconfig error: {0}")]
    KubeconfigError(#[from] kube::config::KubeconfigError),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Apply kept failing after every retry for one cluster
    #[error("Apply for cluster {master_ip} failed after {attempts} attempts: {source}")]
    ApplyExhausted {
        master_ip: String,
        attempts: u32,
        #[source]
        source: ApplyError,
    },

    /// The metrics server could not bind or stopped serving
    #[error("Server error: {0}")]
    ServerError(String),

    /// A background task panicked or was cancelled
    #[error("Task error: {0}")]
    TaskError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
