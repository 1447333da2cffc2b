//! HTTP surface of the generator
//!
//! Serves the prometheus metrics, a health check and a read-only view of
//! the topology that is handed to the template.

mod dto;
mod handlers;
mod server;

pub use server::{router, run_server};
