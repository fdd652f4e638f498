//! Scaleway
//!
//! ```text
//! ScwConfig ──► ScwCloud (trait) ◄── FakeScwCloud (testing)
//!                   ▲
//!        tasks::{Vpc, PrivateNetwork, DhcpConfig, Gateway, GatewayNetwork,
//!                LoadBalancer, DnsRecord, Instance, PrivateNic, SshKey}
//! ```

pub mod cloud;
pub mod config;
pub mod model;
pub mod tags;
pub mod tasks;
pub mod testing;

pub use cloud::{wait_for_server_state, ScwCloud, ScwCloudHandle, ScwContext, WaitOptions};
pub use config::ScwConfig;
pub use model::*;
pub use tags::*;

#[cfg(test)]
pub use cloud::MockScwCloud;
