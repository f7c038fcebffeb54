//! Deterministic simulation harness for Courier.
//!
//! Seeded implementations of the environment and push transport, plus a
//! [`World`] fixture that wires a [`courier_server::Courier`] to in-memory
//! collaborators and drives the broker on a manual clock. Every run with the
//! same seed and the same script produces the same keys, ids and timings.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod sim_env;
pub mod sim_transport;
pub mod world;

pub use logging::init_tracing;
pub use sim_env::SimEnv;
pub use sim_transport::{PushScript, SimTransport};
pub use world::World;
