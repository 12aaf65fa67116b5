//! Core abstractions for the Dobiss gateway.
//!
//! Topology, runtime state, errors and the traits every dialect implements.

pub mod error;
pub mod logging;
pub mod metadata;
pub mod state;
pub mod topology;
pub mod traits;

pub use error::{GatewayError, Result};
pub use state::*;
pub use topology::*;
pub use traits::*;
