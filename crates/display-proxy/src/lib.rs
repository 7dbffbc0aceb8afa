//! Tool boundary for the display agent: a closed set of typed tool calls, their
//! catalogue, and a forwarder that relays each call to its backing HTTP service.

mod catalogue;
mod client;
mod config;
mod error;
mod tool;

pub use catalogue::{tool_definitions, ToolDefinition};
pub use client::ToolProxy;
pub use config::{Service, ServiceConfig};
pub use error::ProxyError;
pub use tool::{ImageFormat, MetricsPeriod, ToolCall, ToolRequest, TOOL_NAMES};
