//! Lazy traversal of paginated listings.
//!
//! A [`Pager`] asks its fetch function for page 1, hands out the items, and
//! only then asks for page 2. It stops as soon as a page comes back shorter
//! than [`PAGE_SIZE`]; an empty page counts as short. A failed fetch is
//! yielded once as `Err` and ends the sequence, items already yielded stay
//! yielded.

use crate::error::Result;

/// Items requested per page for every listing.
pub const PAGE_SIZE: u32 = 100;

/// Pages are numbered from 1.
pub const FIRST_PAGE: u32 = 1;

pub struct Pager<T, F>
where
    F: FnMut(u32, u32) -> Result<Vec<T>>,
{
    fetch: F,
    next_page: u32,
    buffer: std::vec::IntoIter<T>,
    exhausted: bool,
}

impl<T, F> Pager<T, F>
where
    F: FnMut(u32, u32) -> Result<Vec<T>>,
{
    /// `fetch` receives `(page, per_page)`. Nothing is requested until the
    /// first call to `next`.
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            next_page: FIRST_PAGE,
            buffer: Vec::new().into_iter(),
            exhausted: false,
        }
    }
}

impl<T, F> Iterator for Pager<T, F>
where
    F: FnMut(u32, u32) -> Result<Vec<T>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.next() {
                return Some(Ok(item));
            }
            if self.exhausted {
                return None;
            }

            let page = self.next_page;
            match (self.fetch)(page, PAGE_SIZE) {
                Ok(items) => {
                    tracing::trace!(page, len = items.len(), "fetched page");
                    if items.len() < PAGE_SIZE as usize {
                        self.exhausted = true;
                    }
                    self.next_page += 1;
                    self.buffer = items.into_iter();
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
