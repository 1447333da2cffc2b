//! Command line and environment options
//!
//! `RunArgs` is what clap parses; `GeneratorOptions` is the validated,
//! immutable view shared by every reconciler and the apply pipeline.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{Error, Result};

/// Annotation value that marks a Service as selectable
pub const ANNOTATION_ENABLED_VALUE: &str = "true";

/// Paths the metrics server serves besides the metrics endpoint
const RESERVED_PATHS: [&str; 2] = ["/health", "/topology"];

fn default_kubeconfig() -> String {
    std::env::var("HOME")
        .map(|home| {
            PathBuf::from(home)
                .join(".kube")
                .join("config")
                .display()
                .to_string()
        })
        .unwrap_or_else(|_| ".kube/config".to_string())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Comma separated list of kubeconfig file paths, one managed cluster per entry
    #[arg(long, env = "KUBECONFIG_PATHS", default_value_t = default_kubeconfig())]
    pub kubeconfig_paths: String,

    /// Label key that marks a node as a load-balancing target
    #[arg(long, env = "WORKER_NODE_LABEL", default_value = "worker")]
    pub worker_node_label: String,

    /// Annotation key that marks a NodePort service as selectable
    #[arg(
        long,
        env = "CUSTOM_ANNOTATION",
        default_value = "nginx-conf-generator/enabled"
    )]
    pub custom_annotation: String,

    /// Template rendered on every topology change
    #[arg(long, env = "TEMPLATE_INPUT_FILE", default_value = "resources/ncg.conf.j2")]
    pub template_input_file: PathBuf,

    /// Rendered output, a valid Nginx configuration file
    #[arg(
        long,
        env = "TEMPLATE_OUTPUT_FILE",
        default_value = "/etc/nginx/conf.d/ncg.conf"
    )]
    pub template_output_file: PathBuf,

    /// Command that makes the proxy reload its configuration
    #[arg(long, env = "RELOAD_COMMAND", default_value = "nginx -s reload")]
    pub reload_command: String,

    /// Wall-clock limit for the reload command
    #[arg(long, env = "RELOAD_TIMEOUT_SECONDS", default_value_t = 10)]
    pub reload_timeout_seconds: u64,

    /// Attempts per apply before the failure is reported
    #[arg(long, env = "APPLY_MAX_RETRIES", default_value_t = 5)]
    pub apply_max_retries: u32,

    /// Exit the process when an apply exhausts its retries
    #[arg(long, env = "FAIL_FAST")]
    pub fail_fast: bool,

    /// Port of the metrics server
    #[arg(long, env = "METRICS_PORT", default_value_t = 5000)]
    pub metrics_port: u16,

    /// Endpoint that serves prometheus metrics
    #[arg(long, env = "METRICS_ENDPOINT", default_value = "/metrics")]
    pub metrics_endpoint: String,

    /// Time the metrics server allows for producing a response
    #[arg(long, env = "WRITE_TIMEOUT_SECONDS", default_value_t = 10)]
    pub write_timeout_seconds: u64,

    /// Time the metrics server allows for reading a request body
    #[arg(long, env = "READ_TIMEOUT_SECONDS", default_value_t = 10)]
    pub read_timeout_seconds: u64,

    /// Verbose output (debug level)
    #[arg(short, long, env = "VERBOSE")]
    pub verbose: bool,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Resolved options shared across clusters
#[derive(Clone, Debug)]
pub struct GeneratorOptions {
    pub kubeconfig_paths: Vec<PathBuf>,
    pub worker_node_label: String,
    pub custom_annotation: String,
    pub template_input_file: PathBuf,
    pub template_output_file: PathBuf,
    pub reload_program: String,
    pub reload_args: Vec<String>,
    pub reload_timeout: Duration,
    pub apply_max_retries: u32,
    pub fail_fast: bool,
    pub metrics_port: u16,
    pub metrics_endpoint: String,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
}

impl GeneratorOptions {
    /// Options with the defaults used by tests and embedders
    pub fn with_defaults() -> Self {
        Self {
            kubeconfig_paths: vec![PathBuf::from(default_kubeconfig())],
            worker_node_label: "worker".to_string(),
            custom_annotation: "nginx-conf-generator/enabled".to_string(),
            template_input_file: PathBuf::from("resources/ncg.conf.j2"),
            template_output_file: PathBuf::from("/etc/nginx/conf.d/ncg.conf"),
            reload_program: "nginx".to_string(),
            reload_args: vec!["-s".to_string(), "reload".to_string()],
            reload_timeout: Duration::from_secs(10),
            apply_max_retries: 5,
            fail_fast: false,
            metrics_port: 5000,
            metrics_endpoint: "/metrics".to_string(),
            write_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl TryFrom<&RunArgs> for GeneratorOptions {
    type Error = Error;

    fn try_from(args: &RunArgs) -> Result<Self> {
        let kubeconfig_paths: Vec<PathBuf> = args
            .kubeconfig_paths
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();
        if kubeconfig_paths.is_empty() {
            return Err(Error::ConfigError(
                "at least one kubeconfig path is required".to_string(),
            ));
        }

        if args.worker_node_label.trim().is_empty() {
            return Err(Error::ConfigError(
                "worker node label must not be empty".to_string(),
            ));
        }
        if args.custom_annotation.trim().is_empty() {
            return Err(Error::ConfigError(
                "custom annotation must not be empty".to_string(),
            ));
        }

        let mut reload = args.reload_command.split_whitespace().map(String::from);
        let reload_program = reload
            .next()
            .ok_or_else(|| Error::ConfigError("reload command must not be empty".to_string()))?;
        let reload_args = reload.collect();

        if args.reload_timeout_seconds == 0 {
            return Err(Error::ConfigError(
                "reload timeout must be at least one second".to_string(),
            ));
        }

        if args.write_timeout_seconds == 0 || args.read_timeout_seconds == 0 {
            return Err(Error::ConfigError(
                "metrics server timeouts must be at least one second".to_string(),
            ));
        }

        if !args.metrics_endpoint.starts_with('/') {
            return Err(Error::ConfigError(format!(
                "metrics endpoint must start with '/': {}",
                args.metrics_endpoint
            )));
        }
        if RESERVED_PATHS.contains(&args.metrics_endpoint.as_str()) {
            return Err(Error::ConfigError(format!(
                "metrics endpoint {} is already served by the metrics server",
                args.metrics_endpoint
            )));
        }

        Ok(Self {
            kubeconfig_paths,
            worker_node_label: args.worker_node_label.clone(),
            custom_annotation: args.custom_annotation.clone(),
            template_input_file: args.template_input_file.clone(),
            template_output_file: args.template_output_file.clone(),
            reload_program,
            reload_args,
            reload_timeout: Duration::from_secs(args.reload_timeout_seconds),
            apply_max_retries: args.apply_max_retries.max(1),
            fail_fast: args.fail_fast,
            metrics_port: args.metrics_port,
            metrics_endpoint: args.metrics_endpoint.clone(),
            write_timeout: Duration::from_secs(args.write_timeout_seconds),
            read_timeout: Duration::from_secs(args.read_timeout_seconds),
        })
    }
}
