//! Integration tests for redir-relay
//!
//! The relay runs on a loopback port. NAT redirection is simulated by a
//! resolver that reports a fixed original destination.
//!
//! - `relay_integration`: forwarding, ordering, close propagation, failures
//! - `supervisor_integration`: shutdown and draining
//! - `socks5_integration`: tunneling through a SOCKS5 proxy

pub mod relay_integration;
pub mod socks5_integration;
pub mod supervisor_integration;
