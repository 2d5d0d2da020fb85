//! Cursor-driven "list all" for paginating backends
//!
//! ```text
//! cursor = 0 ──▶ fetch(cursor) ──▶ items ++ page.items
//!                      ▲                   │
//!                      └── page.next ◀─────┤ next == 0 ──▶ done
//!                                          │ next <= cursor ──▶ ProtocolError
//! ```
//!
//! Pages are fetched strictly one after another; there is no prefetch.

use crate::core::error::{GeoError, ProtocolError};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Offset-style continuation marker
///
/// Zero is both the initial cursor and the terminal sentinel returned by a
/// backend that has nothing more to send.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PageCursor(u64);

impl PageCursor {
    pub const START: PageCursor = PageCursor(0);

    pub fn new(offset: u64) -> Self {
        Self(offset)
    }

    pub fn offset(&self) -> u64 {
        self.0
    }

    pub fn is_terminal(&self) -> bool {
        self.0 == 0
    }
}

/// One page of a listing plus the marker for the next request
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: PageCursor,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next: PageCursor) -> Self {
        Self { items, next }
    }

    /// A page with no continuation
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, PageCursor::START)
    }
}

/// Drive `fetch` until the backend returns the zero sentinel
///
/// A marker that does not strictly advance past the current cursor is a
/// protocol violation and aborts the listing; items accumulated so far are
/// discarded. Errors from `fetch` are returned as-is.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>, GeoError>
where
    F: FnMut(PageCursor) -> Fut,
    Fut: Future<Output = Result<Page<T>, GeoError>>,
{
    let mut cursor = PageCursor::START;
    let mut items = Vec::new();
    let mut pages = 0usize;

    loop {
        let page = fetch(cursor).await?;
        pages += 1;
        items.extend(page.items);

        if page.next.is_terminal() {
            break;
        }
        if page.next <= cursor {
            return Err(ProtocolError::CursorNotAdvancing {
                previous: cursor.offset(),
                next: page.next.offset(),
            }
            .into());
        }
        cursor = page.next;
    }

    tracing::trace!(pages, total = items.len(), "pagination complete");
    Ok(items)
}
