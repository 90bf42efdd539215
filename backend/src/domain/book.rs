//! Book data model.

use std::fmt;

use chrono::{DateTime, Utc};
use pagination::{PageRequest, PageRequestError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ports::Entity;

/// Longest accepted book name, in characters.
pub const BOOK_NAME_MAX: usize = 255;

/// Validation errors for book input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookValidationError {
    EmptyName,
    NameTooLong { max: usize },
    Page(PageRequestError),
}

impl fmt::Display for BookValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "book name must not be empty"),
            Self::NameTooLong { max } => {
                write!(f, "book name must be at most {max} characters")
            }
            Self::Page(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for BookValidationError {}

impl From<PageRequestError> for BookValidationError {
    fn from(value: PageRequestError) -> Self {
        Self::Page(value)
    }
}

fn validate_name(name: &str) -> Result<(), BookValidationError> {
    if name.trim().is_empty() {
        return Err(BookValidationError::EmptyName);
    }
    if name.chars().count() > BOOK_NAME_MAX {
        return Err(BookValidationError::NameTooLong { max: BOOK_NAME_MAX });
    }
    Ok(())
}

/// Fields supplied when creating a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl BookDraft {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Check the draft before it reaches storage.
    pub fn validate(&self) -> Result<(), BookValidationError> {
        validate_name(&self.name)
    }
}

/// A stored book.
///
/// `id` and both timestamps are assigned by storage; `updated_at` advances on
/// every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    /// Check the mutable fields before an update.
    pub fn validate(&self) -> Result<(), BookValidationError> {
        validate_name(&self.name)
    }
}

impl Entity for Book {
    type Draft = BookDraft;
    type Filters = BookFilters;
    const KIND: &'static str = "book";
}

/// Listing filters for books.
///
/// Text filters match case-sensitively anywhere in the column; empty strings
/// are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BookFilters {
    pub name: Option<String>,
    pub description: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl BookFilters {
    /// Validate the raw page parameters.
    pub fn page_request(&self) -> Result<PageRequest, BookValidationError> {
        Ok(PageRequest::from_raw(self.limit, self.offset)?)
    }

    /// Name fragment to match, if any.
    pub fn name_fragment(&self) -> Option<&str> {
        non_empty(self.name.as_deref())
    }

    /// Description fragment to match, if any.
    pub fn description_fragment(&self) -> Option<&str> {
        non_empty(self.description.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.is_empty())
}
