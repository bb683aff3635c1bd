//! Paged lookup results
//!
//! `LookupPage` is one page of a single-key lookup; `HashIndexIterator`
//! walks the results of one or many keys (IN lists) page by page.

use std::collections::VecDeque;

use crate::arena::ElementRef;
use crate::document::{DocumentId, DocumentResolver};

use super::errors::IndexResult;
use super::hash_index::HashIndex;
use super::key::IndexKey;

/// Position after the last element of a page.
///
/// Removing that element from the index invalidates the cursor; a later
/// continuation then yields an empty page, even when the element's storage
/// has been reused by another document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupCursor {
    last: ElementRef,
    identity: DocumentId,
}

impl LookupCursor {
    pub(crate) fn new(last: ElementRef, identity: DocumentId) -> Self {
        Self { last, identity }
    }

    /// Cursor after the final entry of a page
    pub(crate) fn after(handles: &[ElementRef], ids: &[DocumentId]) -> Option<Self> {
        Some(Self::new(*handles.last()?, *ids.last()?))
    }

    pub(crate) fn last(&self) -> ElementRef {
        self.last
    }

    pub(crate) fn identity(&self) -> DocumentId {
        self.identity
    }
}

/// One page of lookup results
#[derive(Debug, Clone, PartialEq)]
pub struct LookupPage {
    pub ids: Vec<DocumentId>,
    /// Present when the page is full and more results may follow
    pub cursor: Option<LookupCursor>,
}

impl LookupPage {
    pub fn is_last(&self) -> bool {
        self.cursor.is_none()
    }
}

/// Iterator over the documents matching a list of keys.
///
/// Fetches `batch_size` elements at a time (0 = whole chains). Stops after
/// the first error.
pub struct HashIndexIterator<'a, R: ?Sized> {
    index: &'a HashIndex,
    store: &'a R,
    keys: Vec<IndexKey>,
    position: usize,
    cursor: Option<LookupCursor>,
    batch_size: usize,
    buffer: VecDeque<DocumentId>,
    done: bool,
}

impl<'a, R: DocumentResolver + ?Sized> HashIndexIterator<'a, R> {
    pub(crate) fn new(
        index: &'a HashIndex,
        store: &'a R,
        keys: Vec<IndexKey>,
        batch_size: usize,
    ) -> Self {
        Self {
            index,
            store,
            keys,
            position: 0,
            cursor: None,
            batch_size,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Keys not yet exhausted
    pub fn keys_remaining(&self) -> usize {
        self.keys.len() - self.position
    }

    fn fetch(&mut self) -> IndexResult<()> {
        let key = &self.keys[self.position];
        let handles = self.index.lookup_handles(self.store, key, self.batch_size, self.cursor)?;

        let ids = self.index.identities(&handles)?;

        let full = self.batch_size > 0 && handles.len() == self.batch_size;
        self.cursor = if full { LookupCursor::after(&handles, &ids) } else { None };
        if !full {
            self.position += 1;
        }

        self.buffer.extend(ids);
        Ok(())
    }
}

impl<R: DocumentResolver + ?Sized> Iterator for HashIndexIterator<'_, R> {
    type Item = IndexResult<DocumentId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(id) = self.buffer.pop_front() {
                return Some(Ok(id));
            }
            if self.done || self.position >= self.keys.len() {
                return None;
            }
            if let Err(err) = self.fetch() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}
