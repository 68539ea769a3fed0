//! LLM Provider implementations for Lorekeeper.
//!
//! All providers implement the `lorekeeper_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
