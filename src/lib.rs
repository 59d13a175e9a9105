//! genproxy - one stream protocol in front of many generative-AI APIs
//!
//! A local proxy that forwards chat, responses, embedding, image, speech
//! and video requests to OpenAI, Azure OpenAI or Gemini and streams the
//! results back as `\r`-delimited frames.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod proxy;
pub mod router;

pub use config::Config;
pub use error::{Error, Result};
