use serde::{Deserialize, Serialize};

/// Largest page a client may ask for.
pub const MAX_PER_PAGE: u32 = 100;

/// Posts per page when the client does not say.
pub const DEFAULT_PER_PAGE: u32 = 10;

/// A 1-indexed page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub per_page: u32,
}

impl Page {
    /// Page number is clamped to at least 1, page size to 1..=MAX_PER_PAGE.
    pub fn new(number: u32, per_page: u32) -> Self {
        Self {
            number: number.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn number(number: u32) -> Self {
        Self::new(number, DEFAULT_PER_PAGE)
    }

    pub fn offset(&self) -> u64 {
        (self.number as u64 - 1) * self.per_page as u64
    }

    pub fn limit(&self) -> u32 {
        self.per_page
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::number(1)
    }
}

/// One page of items plus enough to render pager links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, page: Page, total: u64) -> Self {
        Self {
            items,
            page: page.number,
            per_page: page.per_page,
            total,
            total_pages: total.div_ceil(page.per_page.max(1) as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_page_and_size() {
        let page = Page::new(0, 0);
        assert_eq!(page.number, 1);
        assert_eq!(page.per_page, 1);
        assert_eq!(page.offset(), 0);

        let page = Page::new(3, 500);
        assert_eq!(page.per_page, MAX_PER_PAGE);
        assert_eq!(page.offset(), 200);
    }

    #[test]
    fn default_page_is_first_ten() {
        let page = Page::default();
        assert_eq!(page.offset(), 0);
        assert_eq!(page.limit(), 10);
    }

    #[test]
    fn total_pages_rounds_up() {
        let p: Paginated<()> = Paginated::new(vec![], Page::number(1), 15);
        assert_eq!(p.total_pages, 2);
        let p: Paginated<()> = Paginated::new(vec![], Page::number(1), 0);
        assert_eq!(p.total_pages, 0);
    }
}
