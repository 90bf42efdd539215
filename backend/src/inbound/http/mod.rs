//! HTTP inbound adapter. Only operational probes are exposed.

pub mod health;
