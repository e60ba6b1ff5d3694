//! End-to-end scenarios for the gossipnet overlay.
//!
//! Every test runs a real cluster in-process: seeds and peers on
//! loopback TCP with the `dev_default()` profiles (millisecond
//! deadlines, ICMP off). The [`harness`] module owns cluster setup and
//! the raw-socket client used to observe the cluster from outside.

pub mod harness;

#[cfg(test)]
mod failure;
#[cfg(test)]
mod gossip_flow;
#[cfg(test)]
mod registration;
