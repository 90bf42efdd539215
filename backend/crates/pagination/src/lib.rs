//! Offset pagination primitives shared by repository adapters.
//!
//! Inbound adapters receive raw `limit`/`offset` values from callers. These
//! are validated once into a [`PageRequest`] before any storage access, so a
//! malformed request never reaches the connection pool. Adapters answer with
//! a [`Page`] envelope that echoes the effective limit and offset alongside
//! the total number of matching rows.
//!
//! # Examples
//!
//! ```
//! use pagination::{Page, PageRequest};
//!
//! let request = PageRequest::from_raw(None, Some(50)).expect("valid request");
//! assert_eq!(request.limit(), pagination::DEFAULT_PAGE_LIMIT);
//!
//! let page = Page::new(request, 60, vec!["a", "b"]);
//! assert_eq!(page.total, 60);
//! assert!(!page.has_more());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Page size applied when the caller leaves `limit` unset or zero.
pub const DEFAULT_PAGE_LIMIT: u32 = 25;

/// Largest page size a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Validation failures for raw page parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PageRequestError {
    /// The requested limit exceeds [`MAX_PAGE_LIMIT`].
    #[error("invalid page limit {requested} [max={max}]")]
    LimitTooLarge {
        /// Limit supplied by the caller.
        requested: i64,
        /// Largest accepted limit.
        max: u32,
    },
    /// The requested limit is negative.
    #[error("invalid page limit {requested}: must not be negative")]
    NegativeLimit {
        /// Limit supplied by the caller.
        requested: i64,
    },
    /// The requested offset is negative or does not fit the offset range.
    #[error("invalid page offset {requested}")]
    InvalidOffset {
        /// Offset supplied by the caller.
        requested: i64,
    },
}

/// Validated limit/offset pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    limit: u32,
    offset: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl PageRequest {
    /// Validate raw caller input.
    ///
    /// An unset or zero limit falls back to [`DEFAULT_PAGE_LIMIT`]; an unset
    /// offset starts at the first row.
    ///
    /// # Errors
    ///
    /// Returns [`PageRequestError`] when the limit is negative or larger than
    /// [`MAX_PAGE_LIMIT`], or when the offset is negative.
    pub fn from_raw(limit: Option<i64>, offset: Option<i64>) -> Result<Self, PageRequestError> {
        let effective_limit = match limit {
            None | Some(0) => DEFAULT_PAGE_LIMIT,
            Some(requested) if requested < 0 => {
                return Err(PageRequestError::NegativeLimit { requested });
            }
            Some(requested) => u32::try_from(requested)
                .ok()
                .filter(|value| *value <= MAX_PAGE_LIMIT)
                .ok_or(PageRequestError::LimitTooLarge {
                    requested,
                    max: MAX_PAGE_LIMIT,
                })?,
        };

        let effective_offset = match offset {
            None => 0,
            Some(requested) => u32::try_from(requested)
                .map_err(|_| PageRequestError::InvalidOffset { requested })?,
        };

        Ok(Self {
            limit: effective_limit,
            offset: effective_offset,
        })
    }

    /// Effective page size.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of rows skipped before the page starts.
    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.offset
    }
}

/// Page envelope returned by listing operations.
///
/// `data` is always serialised, even when empty, so clients can rely on the
/// field being present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Number of rows matching the filters, ignoring limit and offset.
    pub total: u64,
    /// Effective page size.
    pub limit: u32,
    /// Number of rows skipped.
    pub offset: u32,
    /// Rows in this page.
    pub data: Vec<T>,
}

impl<T> Page<T> {
    /// Build a page for `request` from the counted total and fetched rows.
    #[must_use]
    pub const fn new(request: PageRequest, total: u64, data: Vec<T>) -> Self {
        Self {
            total,
            limit: request.limit,
            offset: request.offset,
            data,
        }
    }

    /// Return true when rows remain beyond this page.
    #[must_use]
    pub fn has_more(&self) -> bool {
        let seen = u64::from(self.offset).saturating_add(self.data.len() as u64);
        seen < self.total
    }

    /// Convert every row while keeping the envelope.
    #[must_use]
    pub fn map<U>(self, convert: impl FnMut(T) -> U) -> Page<U> {
        Page {
            total: self.total,
            limit: self.limit,
            offset: self.offset,
            data: self.data.into_iter().map(convert).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Validation and envelope behaviour.

    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, DEFAULT_PAGE_LIMIT)]
    #[case(Some(0), DEFAULT_PAGE_LIMIT)]
    #[case(Some(1), 1)]
    #[case(Some(100), 100)]
    fn limit_defaults_and_bounds(#[case] raw: Option<i64>, #[case] expected: u32) {
        let request = PageRequest::from_raw(raw, None).expect("limit should be accepted");
        assert_eq!(request.limit(), expected);
        assert_eq!(request.offset(), 0);
    }

    #[rstest]
    #[case(101)]
    #[case(i64::MAX)]
    fn oversized_limit_is_rejected(#[case] raw: i64) {
        let error = PageRequest::from_raw(Some(raw), None).expect_err("limit should fail");
        assert_eq!(
            error,
            PageRequestError::LimitTooLarge {
                requested: raw,
                max: MAX_PAGE_LIMIT
            }
        );
        assert!(error.to_string().contains("max=100"));
    }

    #[rstest]
    fn negative_limit_is_rejected() {
        let error = PageRequest::from_raw(Some(-5), None).expect_err("limit should fail");
        assert_eq!(error, PageRequestError::NegativeLimit { requested: -5 });
    }

    #[rstest]
    #[case(-1)]
    #[case(i64::from(u32::MAX) + 1)]
    fn invalid_offset_is_rejected(#[case] raw: i64) {
        let error = PageRequest::from_raw(Some(10), Some(raw)).expect_err("offset should fail");
        assert_eq!(error, PageRequestError::InvalidOffset { requested: raw });
    }

    #[rstest]
    #[case(0, 3, 10, true)]
    #[case(7, 3, 10, false)]
    #[case(20, 0, 10, false)]
    fn has_more_tracks_remaining_rows(
        #[case] offset: i64,
        #[case] rows: usize,
        #[case] total: u64,
        #[case] expected: bool,
    ) {
        let request = PageRequest::from_raw(Some(3), Some(offset)).expect("valid request");
        let page = Page::new(request, total, vec![0_u8; rows]);
        assert_eq!(page.has_more(), expected);
    }

    #[rstest]
    fn empty_page_serialises_data_field() {
        let page: Page<u8> = Page::new(PageRequest::default(), 0, Vec::new());
        let json = serde_json::to_value(&page).expect("page should serialise");
        assert_eq!(json["data"], serde_json::json!([]));
        assert_eq!(json["limit"], serde_json::json!(DEFAULT_PAGE_LIMIT));
    }

    #[rstest]
    fn map_preserves_envelope() {
        let request = PageRequest::from_raw(Some(2), Some(4)).expect("valid request");
        let page = Page::new(request, 9, vec![1, 2]).map(|value| value * 10);
        assert_eq!(page.data, vec![10, 20]);
        assert_eq!((page.total, page.limit, page.offset), (9, 2, 4));
    }
}
