//! nginx-conf-generator: keeps an Nginx load-balancer configuration in sync
//! with the worker nodes and NodePort services of one or more Kubernetes
//! clusters.

pub mod apply;
pub mod controller;
pub mod error;
pub mod options;
pub mod topology;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
