pub mod base;
pub mod configs;
pub mod factory;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod tool_calls;
pub mod utils;

#[cfg(test)]
pub mod mock;
