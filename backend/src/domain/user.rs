//! User account data model.

use std::fmt;

use chrono::{DateTime, Utc};
use pagination::{PageRequest, PageRequestError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ports::Entity;

/// Longest accepted e-mail address, in characters.
pub const EMAIL_MAX: usize = 320;
/// Shortest accepted first or last name.
pub const PERSON_NAME_MIN: usize = 3;
/// Longest accepted first or last name.
pub const PERSON_NAME_MAX: usize = 255;

/// Validation errors for user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserValidationError {
    InvalidEmail,
    EmailTooLong { max: usize },
    NameTooShort { field: &'static str, min: usize },
    NameTooLong { field: &'static str, max: usize },
    InvertedRange,
    Page(PageRequestError),
}

impl fmt::Display for UserValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEmail => write!(f, "email must look like name@domain.tld"),
            Self::EmailTooLong { max } => write!(f, "email must be at most {max} characters"),
            Self::NameTooShort { field, min } => {
                write!(f, "{field} must be at least {min} characters")
            }
            Self::NameTooLong { field, max } => {
                write!(f, "{field} must be at most {max} characters")
            }
            Self::InvertedRange => write!(f, "created_after must not be later than created_before"),
            Self::Page(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for UserValidationError {}

impl From<PageRequestError> for UserValidationError {
    fn from(value: PageRequestError) -> Self {
        Self::Page(value)
    }
}

fn validate_email(email: &str) -> Result<(), UserValidationError> {
    if email.chars().count() > EMAIL_MAX {
        return Err(UserValidationError::EmailTooLong { max: EMAIL_MAX });
    }
    if email.chars().any(char::is_whitespace) {
        return Err(UserValidationError::InvalidEmail);
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err(UserValidationError::InvalidEmail);
    };
    if local.is_empty() || domain.contains('@') {
        return Err(UserValidationError::InvalidEmail);
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return Err(UserValidationError::InvalidEmail);
    };
    if host.is_empty() || host.starts_with('.') || host.ends_with('.') || tld.len() < 2 {
        return Err(UserValidationError::InvalidEmail);
    }
    Ok(())
}

fn validate_person_name(field: &'static str, value: &str) -> Result<(), UserValidationError> {
    let length = value.trim().chars().count();
    if length < PERSON_NAME_MIN {
        return Err(UserValidationError::NameTooShort {
            field,
            min: PERSON_NAME_MIN,
        });
    }
    if length > PERSON_NAME_MAX {
        return Err(UserValidationError::NameTooLong {
            field,
            max: PERSON_NAME_MAX,
        });
    }
    Ok(())
}

fn validate_fields(email: &str, first_name: &str, last_name: &str) -> Result<(), UserValidationError> {
    validate_email(email)?;
    validate_person_name("first_name", first_name)?;
    validate_person_name("last_name", last_name)
}

/// Fields supplied when registering a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDraft {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl UserDraft {
    pub fn new(
        email: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    pub fn validate(&self) -> Result<(), UserValidationError> {
        validate_fields(&self.email, &self.first_name, &self.last_name)
    }
}

/// A stored user account. E-mail addresses are unique across users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn validate(&self) -> Result<(), UserValidationError> {
        validate_fields(&self.email, &self.first_name, &self.last_name)
    }
}

impl Entity for User {
    type Draft = UserDraft;
    type Filters = UserFilters;
    const KIND: &'static str = "user";
}

/// Listing filters for users.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserFilters {
    /// Fragment matched anywhere in the address.
    pub email: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl UserFilters {
    /// Validate the creation range and page parameters.
    pub fn page_request(&self) -> Result<PageRequest, UserValidationError> {
        if let (Some(after), Some(before)) = (self.created_after, self.created_before) {
            if after > before {
                return Err(UserValidationError::InvertedRange);
            }
        }
        Ok(PageRequest::from_raw(self.limit, self.offset)?)
    }

    pub fn email_fragment(&self) -> Option<&str> {
        self.email.as_deref().filter(|text| !text.is_empty())
    }
}
