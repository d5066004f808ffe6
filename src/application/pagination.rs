//! Offset pagination over store queries.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaginationError {
    #[error("page {page} is out of range")]
    OutOfRange { page: u64 },
    #[error("invalid page request: {0}")]
    InvalidRequest(String),
}

/// Validated page request; pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub per_page: u64,
}

impl PageRequest {
    pub fn new(page: u64, per_page: u64) -> Result<Self, PaginationError> {
        if page == 0 {
            return Err(PaginationError::InvalidRequest(
                "page numbers start at 1".to_string(),
            ));
        }
        if per_page == 0 {
            return Err(PaginationError::InvalidRequest(
                "per_page must be positive".to_string(),
            ));
        }
        Ok(Self { page, per_page })
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

/// One page of results plus the totals needed for navigation.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        Self {
            items,
            page: request.page,
            per_page: request.per_page,
            total,
        }
    }

    pub fn pages(&self) -> u64 {
        self.total.div_ceil(self.per_page)
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_page_and_size() {
        assert!(PageRequest::new(0, 10).is_err());
        assert!(PageRequest::new(1, 0).is_err());
    }

    #[test]
    fn offset_counts_from_first_page() {
        let request = PageRequest::new(3, 10).expect("request");
        assert_eq!(request.offset(), 20);
    }

    #[test]
    fn navigation_flags_follow_totals() {
        let request = PageRequest::new(2, 5).expect("request");
        let page = Paginated::new(vec![1, 2, 3, 4, 5], request, 11);
        assert_eq!(page.pages(), 3);
        assert!(page.has_prev());
        assert!(page.has_next());

        let last = Paginated::new(vec![11], PageRequest::new(3, 5).expect("request"), 11);
        assert!(!last.has_next());
    }
}
