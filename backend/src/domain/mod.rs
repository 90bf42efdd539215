//! Domain entities and ports.
//!
//! Entities are plain data with validation; ports describe what the domain
//! needs from storage without naming any database.

pub mod book;
pub mod ports;
pub mod user;

pub use self::book::{Book, BookDraft, BookFilters, BookValidationError};
pub use self::user::{User, UserDraft, UserFilters, UserValidationError};
pub use pagination::{Page, PageRequest, PageRequestError};
