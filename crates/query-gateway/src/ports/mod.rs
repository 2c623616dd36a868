//! Port definitions (hexagonal architecture).

pub mod outbound;

pub use outbound::*;
