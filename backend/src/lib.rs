//! Bookshelf persistence service.
//!
//! Provides a pooled, transactional PostgreSQL data-access layer with
//! generic repositories, namespace isolation, and versioned migrations, plus
//! the startup sequence that wires them together.

pub mod config;
pub mod domain;
pub mod inbound;
pub mod outbound;
pub mod startup;
