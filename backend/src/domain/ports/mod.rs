//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod migrator;
mod repository;

#[cfg(test)]
pub use migrator::MockMigrator;
pub use migrator::{AppliedScript, MigrationError, MigrationOutcome, MigrationRecord, Migrator};
pub use repository::{
    ConnectionErrorKind, Entity, Repository, RepositoryError, TransactionErrorKind,
};
