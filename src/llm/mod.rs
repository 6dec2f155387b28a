//! LLM integration.
//!
//! The LLM is consumed as a request/response service through [`LlmProvider`].
//! The workflow generator uses it to obtain workflow graphs as JSON.

mod client;
pub mod json_extraction;

pub use client::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
};
pub use json_extraction::extract_json_object;
