//! Circuits and sequence-number virtualization for LLUDP.
//!
//! A circuit owns the packet-id space of one UDP conversation. This crate
//! has two flavours:
//!
//! - [`Circuit`] numbers packets that this side originates.
//! - [`ProxiedCircuit`] relays another endpoint's packets and can inject
//!   or drop packets mid-stream. Per-direction [`InjectionTracker`]s keep
//!   both ends' ids and acks consistent.
//!
//! [`MessageHandler`] fans decoded messages out to [`Subscription`]s and
//! supports waiting for a specific reply with a deadline.

mod circuit;
mod config;
mod error;
mod handler;
mod injection;
mod proxied;

pub use circuit::Circuit;
pub use config::CircuitConfig;
pub use error::CircuitError;
pub use handler::{MessageHandler, Subscription};
pub use injection::{InjectionTracker, NoOriginalId};
pub use proxied::{Disposition, ProxiedCircuit};
