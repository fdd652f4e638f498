//! Cloud provider support for keel
//!
//! Each provider exposes a narrow async contract over its APIs, an in-memory
//! fake of that contract, and the tasks model builders emit against it.
//! Scaleway is the provider implemented here.

#![deny(missing_docs)]

pub mod scaleway;

pub use scaleway::{ScwCloud, ScwCloudHandle, ScwConfig};
