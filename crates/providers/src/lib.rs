//! Model endpoint clients for Atlas.
//!
//! All providers implement the `atlas_core::Provider` trait.

pub mod ollama;

pub use ollama::{OllamaProvider, decode_ndjson};
