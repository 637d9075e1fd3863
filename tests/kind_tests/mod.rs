//! Stories about running fleetbench against real kind clusters
//!
//! # Test Organization
//!
//! - `topology_lifecycle`: creating a primary with a remote, observing it and
//!   tearing it down again
//!
//! - `dns_federation`: writing trust config and forwarding federated zones
//!   through CoreDNS on every member
//!
//! - `distributed_run`: fanning a command test out to every member and
//!   merging the per-cluster results
//!
//! # Running These Tests
//!
//! ```bash
//! # Everything (~5-10min, creates up to two clusters at a time)
//! cargo test --test kind -- --ignored --test-threads=1
//!
//! # One story
//! cargo test --test kind dns_federation -- --ignored --nocapture
//! ```

mod distributed_run;
mod dns_federation;
mod helpers;
mod topology_lifecycle;
