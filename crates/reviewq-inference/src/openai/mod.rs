//! OpenAI-compatible model backend.
//!
//! Works with any endpoint that speaks the chat completions API (OpenAI,
//! Azure OpenAI, Ollama in compatibility mode, vLLM, LM Studio).
//!
//! # Example
//!
//! ```rust,no_run
//! use reviewq_inference::openai::{OpenAIBackend, OpenAIConfig};
//!
//! let config = OpenAIConfig {
//!     base_url: "http://localhost:11434/v1".to_string(),
//!     gen_model: "llama3".to_string(),
//!     ..OpenAIConfig::default()
//! };
//! let backend = OpenAIBackend::new(config).unwrap();
//! ```

mod backend;
mod error;
mod streaming;
mod types;

pub use backend::{
    OpenAIBackend, OpenAIConfig, DEFAULT_GEN_MODEL, DEFAULT_OPENAI_URL, DEFAULT_TIMEOUT_SECS,
};
pub use error::{to_reviewq_error, OpenAIErrorCode};
pub use streaming::{parse_sse_stream, TokenStream};
pub use types::*;
