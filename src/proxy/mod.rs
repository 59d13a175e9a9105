//! HTTP proxy server module.
//!
//! Accepts generation requests, forwards them to the selected provider and
//! writes the normalized result back as a `\r`-delimited frame stream.

pub mod fallback;
mod handlers;
pub mod jobs;
pub mod parser;
mod server;
pub mod stream;
pub mod types;

pub use handlers::{DEFAULT_VIDEO_MODEL, PROVIDER_HEADER};
pub use jobs::{JobCheck, PollSettings};
pub use parser::Fragment;
pub use server::{build_http_client, create_router, run_server, AppState, RequestId, REQUEST_ID_HEADER};
pub use stream::GenerationRequest;
pub use types::{EndpointKind, Message};
