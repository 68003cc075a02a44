//! tutorchat streams answers from GLM and Doubao chat models for a tutoring
//! chat, keeping the model's reasoning separate from its answer.
//!
//! The crate is organized in a few layers:
//! - [`core`] owns one assistant turn end to end: model selection, request
//!   building, SSE decoding, accumulation, retries, cancellation and the
//!   commit to a [`core::store::ConversationStore`].
//! - [`api`] defines the chat completion payloads sent to and read from
//!   providers.
//! - [`cli`] is the terminal front end that drives [`core::view`].
//!
//! The binary (`src/main.rs`) only calls [`cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
