//! # reviewq-inference
//!
//! Model backend for reviewq. [`openai::OpenAIBackend`] implements the
//! [`reviewq_core::ReviewModel`] and [`reviewq_core::QaModel`] capabilities
//! against any OpenAI-compatible chat completions endpoint.

pub mod openai;
pub mod prompts;

pub use openai::{OpenAIBackend, OpenAIConfig};
