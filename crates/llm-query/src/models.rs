//! These models represent the values passed between callers and providers
//!
//! There are several vendor formats we need to interact with:
//! - openai compatible chat completions (openai, openrouter, xai), sent to and from the LLM
//! - gemini generateContent, sent to and from the LLM
//! - ollama chat, sent to and from a local runtime
//!
//! Each adapter immediately converts those wire formats into the structs defined here, and
//! the wire types never leave the adapter modules. Because of the need for compatibility,
//! the internal models are not an exact match to any of these formats.
pub mod delta;
pub mod message;
pub mod request;
pub mod response;
pub mod role;
pub mod tool;
