//! Provider registry, model routing and per-model capabilities.
//!
//! This module decides:
//! - Which configured provider serves a request
//! - What a model supports (audio output, truncation, realtime API generation)
//! - Which role carries the injected system prompt

mod capabilities;
mod selector;

pub use capabilities::{ApiGeneration, CapabilityTable, ModelCapabilities, SystemRole};
pub use selector::{ProviderHandle, Router, AUTO_PROVIDER};
