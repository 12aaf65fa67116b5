//! Dialect clients.
//!
//! Each client binds a frame codec to a [`FrameTransport`](crate::core::traits::FrameTransport)
//! and implements [`DobissProtocol`](crate::core::traits::DobissProtocol).
//! The Fake simulator implements the same trait purely in memory.

pub mod ambiance_pro;
pub mod fake;
pub mod sx;

pub use ambiance_pro::AmbianceProClient;
pub use fake::FakeProtocol;
pub use sx::SxClient;
