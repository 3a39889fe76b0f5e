//! # binix-urlrequest - Asynchronous URL Requests
//!
//! A thread-safe HTTP/QUIC request client. Requests are handed to a
//! pluggable network engine and every event is reported back to the
//! application on an executor it chooses.
//!
//! ## Architecture
//!
//! - **network::request**: request lifecycle and state machine
//! - **network::callback**: application callback interface
//! - **network::executor**: thread, tokio and inline executors
//! - **network::engine**: the engine boundary and handle ownership
//! - **network::bootstrap**: one-time engine initialization
//! - **network::exception**: failure taxonomy and retryability
//! - **network::context**: engine context, configuration, finished listeners
//! - **network::upload**: request body providers
//! - **utils**: shared error types

pub mod network;
pub mod utils;

pub use network::{UrlRequest, UrlRequestBuilder, UrlRequestCallback, UrlRequestContext};
pub use utils::{RequestError, Result};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = "binix-urlrequest";
