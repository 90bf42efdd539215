//! Shared helpers for Diesel repository implementations.

use pagination::{Page, PageRequest};

/// Build a `LIKE` pattern matching `fragment` anywhere in a value.
///
/// `%`, `_`, and the escape character itself are escaped so callers can
/// search for them literally. PostgreSQL's default `LIKE` escape is `\`.
pub fn contains_pattern(fragment: &str) -> String {
    let mut pattern = String::with_capacity(fragment.len() + 2);
    pattern.push('%');
    for ch in fragment.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Assemble a page from a `COUNT(*)` result and the fetched rows.
pub fn page_from_rows<R, T>(request: PageRequest, total: i64, rows: Vec<R>) -> Page<T>
where
    R: Into<T>,
{
    let total = u64::try_from(total).unwrap_or_default();
    Page::new(request, total, rows.into_iter().map(Into::into).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("dune", "%dune%")]
    #[case("100%", "%100\\%%")]
    #[case("snake_case", "%snake\\_case%")]
    #[case("back\\slash", "%back\\\\slash%")]
    fn fragments_are_escaped(#[case] fragment: &str, #[case] expected: &str) {
        assert_eq!(contains_pattern(fragment), expected);
    }

    #[rstest]
    fn page_converts_rows_and_clamps_total() {
        let request = PageRequest::from_raw(Some(2), Some(0)).expect("valid request");
        let page: Page<i64> = page_from_rows(request, -1, vec![1_i32, 2]);
        assert_eq!(page.total, 0);
        assert_eq!(page.data, vec![1, 2]);
    }
}
