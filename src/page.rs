//! Lazy iteration over server-paginated list resources.

use std::{fmt, iter::FusedIterator};

use serde::de::DeserializeOwned;

use crate::{wire::PageEnvelope, AnalyticsError, Result, RetryingExecutor};

/// Key holding the item array in most list responses.
pub const DEFAULT_ITEMS_KEY: &str = "items";

/// One fetched page: its items in server order and where the next one is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<T> {
    items: Vec<T>,
    next: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next: Option<String>) -> Self {
        Self { items, next }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn next_uri(&self) -> Option<&str> {
        self.next.as_deref()
    }

    pub fn into_parts(self) -> (Vec<T>, Option<String>) {
        (self.items, self.next)
    }
}

impl<T: DeserializeOwned> Page<T> {
    /// Decodes `{"items": [...], "paging": {"nextUri": ...}}`.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        Self::from_json_with_key(body, DEFAULT_ITEMS_KEY)
    }

    /// Decodes a page whose item array lives under `key`.
    pub fn from_json_with_key(body: &[u8], key: &str) -> Result<Self> {
        let mut envelope: PageEnvelope = serde_json::from_slice(body)
            .map_err(|err| AnalyticsError::Decode(format!("invalid page JSON: {err}")))?;
        let items = envelope
            .rest
            .remove(key)
            .ok_or_else(|| AnalyticsError::Decode(format!("page has no '{key}' array")))?;
        let items = serde_json::from_value(items)
            .map_err(|err| AnalyticsError::Decode(format!("invalid items in '{key}': {err}")))?;
        let next = envelope.paging.next_uri.filter(|uri| !uri.is_empty());
        Ok(Self { items, next })
    }
}

/// Offset and limit for the first request of a listing.
///
/// Later pages follow the server's `nextUri` verbatim, which already carries
/// whatever paging parameters the server wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u64,
}

impl PageRequest {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    pub(crate) fn apply(&self, uri: &str) -> String {
        let separator = if uri.contains('?') { '&' } else { '?' };
        format!(
            "{uri}{separator}offset={}&limit={}",
            self.offset, self.limit
        )
    }
}

type FetchFn<T> = Box<dyn FnMut(&str) -> Result<Page<T>> + Send>;

/// Forward-only iterator over the items of every page of a listing.
///
/// Pages are fetched one at a time, only when the previous one is used up.
/// A failed fetch is yielded once as `Err`, after which the cursor is done.
pub struct PageCursor<T> {
    items: std::vec::IntoIter<T>,
    next: Option<String>,
    fetch: FetchFn<T>,
    pages_fetched: usize,
}

impl<T> fmt::Debug for PageCursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageCursor")
            .field("remaining_in_page", &self.items.len())
            .field("next", &self.next)
            .field("pages_fetched", &self.pages_fetched)
            .finish_non_exhaustive()
    }
}

impl<T> PageCursor<T> {
    /// Seeds a cursor with an already fetched first page.
    pub fn new<F>(first: Page<T>, fetch: F) -> Self
    where
        F: FnMut(&str) -> Result<Page<T>> + Send + 'static,
    {
        let (items, next) = first.into_parts();
        Self {
            items: items.into_iter(),
            next,
            fetch: Box::new(fetch),
            pages_fetched: 1,
        }
    }

    /// Pages retrieved so far, the seed page included.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }
}

impl<T: DeserializeOwned + 'static> PageCursor<T> {
    /// Fetches the first page of `uri` and returns a cursor over the listing.
    ///
    /// Every fetch goes through `executor`, so page requests get the same
    /// retries as any other call.
    pub fn start(executor: RetryingExecutor, uri: &str, items_key: &str) -> Result<Self> {
        let items_key = items_key.to_owned();
        let fetch = move |uri: &str| -> Result<Page<T>> {
            #[cfg(feature = "tracing")]
            tracing::debug!(%uri, "fetching page");
            let response = executor.get(uri)?;
            Page::from_json_with_key(&response.body, &items_key)
        };
        let first = fetch(uri)?;
        Ok(Self::new(first, fetch))
    }
}

impl<T> Iterator for PageCursor<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.items.next() {
                return Some(Ok(item));
            }
            let uri = self.next.take()?;
            match (self.fetch)(&uri) {
                Ok(page) => {
                    let (items, next) = page.into_parts();
                    self.items = items.into_iter();
                    self.next = next;
                    self.pages_fetched += 1;
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl<T> FusedIterator for PageCursor<T> {}
