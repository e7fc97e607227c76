#![forbid(unsafe_code)]

//! Streaming download proxy for online video platforms.
//!
//! A request names a source URL and a media kind; the proxy resolves it
//! through an extraction backend and relays the bytes to the client as an
//! attachment without buffering the whole file.

pub mod config;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod preflight;
pub mod resolver;
pub mod server;
pub mod session;
pub mod streamer;
