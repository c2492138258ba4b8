//! Inference: everything on the model side of the boundary.
//!
//! - `types`: canonical message model and request/response types
//! - `adapters`: wire codecs for the three model families
//! - `tool_call_parser`: tool calls embedded in free text
//! - `client`: the `ModelEndpoint` seam and its HTTP implementation
//! - `config`: YAML configuration with env-var interpolation
//! - `errors`: inference errors and their recovery classes
//!
//! Which wire shape a session speaks is a config change, not a code change.

pub mod adapters;
pub mod client;
pub mod config;
pub mod errors;
pub mod tool_call_parser;
pub mod types;

// Re-exports for convenience
pub use client::{InferenceClient, ModelEndpoint};
pub use config::{AppConfig, EndpointConfig, SessionSettings, ToolRoute};
pub use errors::{ErrorClass, InferenceError};
pub use types::{
    ErrorMetadata, Message, ModelFamily, ModelRequest, ModelResponse, Role, ToolDefinition,
    ToolInvocation, ToolResult, Usage,
};
