//! # lludp-proxy
//!
//! A transparent intercepting proxy for LLUDP circuits.
//!
//! The proxy sits between a viewer and a simulator, decodes every
//! packet, lets [`MessageHook`]s inspect, rewrite, drop or inject
//! messages, and keeps both sides' packet ids and acks consistent.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lludp_proxy::ProxyServer;
//!
//! # async fn start() -> Result<(), lludp_proxy::ProxyError> {
//! let server = ProxyServer::builder()
//!     .listen("127.0.0.1:13001")
//!     .upstream("127.0.0.1:13000")
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod hook;
mod relay;
mod server;
mod session;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use hook::{MessageHook, Verdict};
pub use relay::Relay;
pub use server::{Injector, ProxyServer, ProxyServerBuilder};
pub use session::Session;
