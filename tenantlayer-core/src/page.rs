//! Pagination and result types for paged queries.
//!
//! A [`PaginationParams`] value is the validated page descriptor of a request. The store
//! fetches one window of records plus the total count, and [`PaginationParams::page_of`]
//! wraps them into a [`Page`] with navigation metadata.

use serde::{Deserialize, Serialize};

/// A single page of paginated results.
///
/// # Type Parameters
///
/// * `T` - The type of items contained in this page
///
/// # Example
///
/// ```ignore
/// use tenantlayer::page::Page;
///
/// let page: Page<String> = Page::builder(vec!["item1".to_string()])
///     .with_total_count(100)
///     .with_page(1, 10)
///     .with_next_page(Some(2))
///     .build();
///
/// assert_eq!(page.items.len(), 1);
/// assert_eq!(page.total_count, 100);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The items contained in this page.
    pub items: Vec<T>,
    /// Total count of items across all pages.
    pub total_count: usize,
    /// The 1-indexed number of this page.
    pub page: usize,
    /// The requested number of items per page.
    pub page_size: usize,
    /// The next page number (if more pages exist).
    pub next_page: Option<usize>,
    /// The previous page number (if this is not the first page).
    pub previous_page: Option<usize>,
}

impl<T> Page<T> {
    /// Creates a new builder for constructing a page with custom settings.
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }

    /// Converts the items of this page, keeping the metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page: self.page,
            page_size: self.page_size,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
            page: 1,
            page_size: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

/// Builder for constructing [`Page`] instances with fluent API.
pub struct PageBuilder<T> {
    page: Page<T>,
}

impl<T> PageBuilder<T> {
    /// Creates a new builder with the given items.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            page: Page { items, ..Page::default() },
        }
    }

    /// Sets the total count of items across all pages.
    pub fn with_total_count(mut self, total_count: usize) -> Self {
        self.page.total_count = total_count;
        self
    }

    /// Sets the page number and page size.
    pub fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page.page = page;
        self.page.page_size = page_size;
        self
    }

    /// Sets the next page number (or `None` if this is the last page).
    pub fn with_next_page(mut self, next_page: Option<usize>) -> Self {
        self.page.next_page = next_page;
        self
    }

    /// Sets the previous page number (or `None` if this is the first page).
    pub fn with_previous_page(mut self, previous_page: Option<usize>) -> Self {
        self.page.previous_page = previous_page;
        self
    }

    /// Builds and returns the final [`Page`] instance.
    pub fn build(self) -> Page<T> {
        self.page
    }
}

/// Parameters for paginating through large result sets.
///
/// Pages are 1-indexed (page 1 is the first page).
///
/// # Example
///
/// ```ignore
/// use tenantlayer::page::PaginationParams;
///
/// let params = PaginationParams::new(3, 20);
/// assert_eq!(params.offset(), 40);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaginationParams {
    /// The page number (1-indexed).
    pub page: usize,
    /// Number of items per page.
    pub per_page: usize,
}

impl PaginationParams {
    /// Creates new pagination parameters.
    ///
    /// # Arguments
    ///
    /// * `page` - The page number (1-indexed)
    /// * `per_page` - Number of items per page
    pub fn new(page: usize, per_page: usize) -> Self {
        Self { page, per_page }
    }

    /// Calculates the offset (number of items to skip) for this page.
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }

    /// Wraps one fetched window of items into a [`Page`].
    ///
    /// # Arguments
    ///
    /// * `items` - The items of this page, already sliced by the store
    /// * `total_count` - The number of items across all pages
    pub fn page_of<T>(&self, items: Vec<T>, total_count: usize) -> Page<T> {
        let end = self.offset().saturating_add(items.len());

        Page::builder(items)
            .with_total_count(total_count)
            .with_page(self.page, self.per_page)
            .with_next_page(if end < total_count {
                Some(self.page + 1)
            } else {
                None
            })
            .with_previous_page(if self.page > 1 {
                Some(self.page - 1)
            } else {
                None
            })
            .build()
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_zero_based() {
        assert_eq!(PaginationParams::new(1, 10).offset(), 0);
        assert_eq!(PaginationParams::new(3, 20).offset(), 40);
    }

    #[test]
    fn middle_page_links_both_ways() {
        let page = PaginationParams::new(2, 10).page_of((11..=20).collect::<Vec<_>>(), 35);

        assert_eq!(page.items.first(), Some(&11));
        assert_eq!(page.total_count, 35);
        assert_eq!(page.page, 2);
        assert_eq!(page.page_size, 10);
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.previous_page, Some(1));
    }

    #[test]
    fn last_page_has_no_next() {
        let page = PaginationParams::new(4, 10).page_of(vec![31, 32, 33, 34, 35], 35);
        assert_eq!(page.next_page, None);
        assert_eq!(page.previous_page, Some(3));
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let page: Page<i32> = PaginationParams::new(9, 10).page_of(vec![], 35);
        assert!(page.items.is_empty());
        assert_eq!(page.next_page, None);
        assert_eq!(page.total_count, 35);
    }
}
