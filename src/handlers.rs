//! Reference handler implementations.

pub mod echo;
pub mod loopback;

pub use echo::EchoHandler;
pub use loopback::{extend_loopback, ExtendedLoopbackHandler, LoopbackHandler};
