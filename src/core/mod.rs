pub mod accumulator;
pub mod builtin_models;
pub mod chat_stream;
pub mod config;
pub mod error;
pub mod message;
pub mod model_policy;
pub mod request;
pub mod retry;
pub mod session;
pub mod store;
pub mod stream_decoder;
pub mod view;
