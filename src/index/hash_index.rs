//! Hash index
//!
//! Composes the key extractor, the element arena and the multi-value hash
//! table into a secondary index over the documents of a `DocumentResolver`.
//!
//! Each indexed document contributes one element per extracted tuple. The
//! index tracks the elements of every document so that removal deletes
//! exactly what insertion stored.
//!
//! Sub-values larger than the inline limit are stored as offsets into the
//! document, so a document must stay resolvable, unchanged, for as long as
//! it is indexed: remove it from the index before replacing or deleting it
//! in the store.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::arena::{Arena, ElementRef};
use crate::document::{DocumentId, DocumentResolver};
use crate::observability::{log_event, Event, IndexMetrics, ObservationScope};

use super::assoc_multi::{AssocHelper, AssocMulti, BucketStats, InvariantViolation, Multi, Unique};
use super::config::IndexConfig;
use super::element::{hash_slices, IndexElement, SubValue};
use super::errors::{IndexError, IndexErrorCode, IndexResult};
use super::extractor::{extract_tuples, IndexTuple};
use super::iterator::{HashIndexIterator, LookupCursor, LookupPage};
use super::key::IndexKey;
use super::path::AttributePath;

const BULK_LOAD_SCOPE: &str = "INDEX_BULK_LOAD";

/// Hashes and compares table handles through the arena and the documents.
pub struct ElementHelper<'a, R: ?Sized> {
    arena: &'a Arena<IndexElement>,
    resolver: &'a R,
}

impl<'a, R: DocumentResolver + ?Sized> ElementHelper<'a, R> {
    pub fn new(arena: &'a Arena<IndexElement>, resolver: &'a R) -> Self {
        Self { arena, resolver }
    }

    fn element(&self, handle: &ElementRef) -> IndexResult<&'a IndexElement> {
        self.arena.get(*handle).ok_or_else(|| dangling(handle))
    }

    /// Owning document of a handle
    pub fn identity(&self, handle: &ElementRef) -> IndexResult<DocumentId> {
        Ok(self.element(handle)?.identity())
    }
}

impl<R: DocumentResolver + ?Sized> AssocHelper<ElementRef> for ElementHelper<'_, R> {
    type Key = IndexKey;

    fn hash_key(&self, key: &IndexKey) -> IndexResult<u64> {
        Ok(key.hash())
    }

    fn hash_element(&self, element: &ElementRef, by_key: bool) -> IndexResult<u64> {
        let element = self.element(element)?;
        if by_key {
            element.hash_key(self.resolver)
        } else {
            Ok(element.hash_identity())
        }
    }

    fn is_equal_key_element(&self, key: &IndexKey, element: &ElementRef) -> IndexResult<bool> {
        key.matches(self.element(element)?, self.resolver)
    }

    fn is_equal_element_element(&self, left: &ElementRef, right: &ElementRef) -> IndexResult<bool> {
        if left == right {
            return Ok(true);
        }
        let (left, right) = (self.element(left)?, self.element(right)?);
        Ok(left.identity() == right.identity() && left.key_equals(right, self.resolver)?)
    }

    fn is_equal_element_element_by_key(
        &self,
        left: &ElementRef,
        right: &ElementRef,
    ) -> IndexResult<bool> {
        if left == right {
            return Ok(true);
        }
        self.element(left)?.key_equals(self.element(right)?, self.resolver)
    }
}

/// Table flavor, fixed at creation
#[derive(Debug)]
pub enum IndexMode {
    Unique(AssocMulti<ElementRef, Unique>),
    Multi(AssocMulti<ElementRef, Multi>),
}

macro_rules! with_table {
    ($mode:expr, $table:ident => $body:expr) => {
        match $mode {
            IndexMode::Unique($table) => $body,
            IndexMode::Multi($table) => $body,
        }
    };
}

/// Serializable summary of an index
#[derive(Debug, Clone, Serialize)]
pub struct IndexDescription {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub index_type: &'static str,
    pub fields: Vec<String>,
    pub unique: bool,
    pub sparse: bool,
    pub deduplicate: bool,
    pub allow_partial: bool,
    pub elements: usize,
    pub documents: usize,
    pub buckets: usize,
    pub memory_usage: usize,
    pub selectivity_estimate: f64,
}

/// In-memory hash index
#[derive(Debug)]
pub struct HashIndex {
    id: Uuid,
    config: IndexConfig,
    paths: Vec<AttributePath>,
    mode: IndexMode,
    arena: Arena<IndexElement>,
    /// Elements stored per document
    documents: HashMap<DocumentId, Vec<ElementRef>>,
    metrics: IndexMetrics,
    is_rollback: bool,
    resizes_seen: usize,
}

impl HashIndex {
    pub fn new(config: IndexConfig) -> IndexResult<Self> {
        let paths = config.validate()?;
        let mode = if config.unique {
            IndexMode::Unique(AssocMulti::new(config.num_buckets, config.initial_bucket_capacity)?)
        } else {
            IndexMode::Multi(AssocMulti::new(config.num_buckets, config.initial_bucket_capacity)?)
        };
        let arena = if config.recycle_elements {
            Arena::with_recycling()
        } else {
            Arena::new()
        };

        let index = Self {
            id: Uuid::new_v4(),
            config,
            paths,
            mode,
            arena,
            documents: HashMap::new(),
            metrics: IndexMetrics::new(),
            is_rollback: false,
            resizes_seen: 0,
        };

        let id = index.id.to_string();
        let fields = index.config.fields.join(",");
        let buckets = index.config.num_buckets.to_string();
        log_event(
            Event::IndexCreated,
            &[
                ("index", id.as_str()),
                ("fields", fields.as_str()),
                ("mode", with_table!(&index.mode, t => t.policy_name())),
                ("buckets", buckets.as_str()),
            ],
        );
        Ok(index)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn paths(&self) -> &[AttributePath] {
        &self.paths
    }

    pub fn mode(&self) -> &IndexMode {
        &self.mode
    }

    pub fn is_unique(&self) -> bool {
        matches!(self.mode, IndexMode::Unique(_))
    }

    pub fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }

    /// While set, unique constraint violations are skipped silently.
    pub fn set_rollback(&mut self, is_rollback: bool) {
        self.is_rollback = is_rollback;
    }

    pub fn is_rollback(&self) -> bool {
        self.is_rollback
    }

    /// Whether `doc_id` has elements in the index
    pub fn contains_document(&self, doc_id: DocumentId) -> bool {
        self.documents.contains_key(&doc_id)
    }

    /// Extract the tuples of a document and allocate one element per
    /// distinct tuple. Nothing is inserted into the table yet.
    fn build_elements<R>(&mut self, store: &R, doc_id: DocumentId) -> IndexResult<Vec<ElementRef>>
    where
        R: DocumentResolver + ?Sized,
    {
        let document = store
            .resolve(doc_id)
            .ok_or_else(|| {
                IndexError::document_not_found(doc_id, "resolver has no such document")
            })?;
        let tuples = distinct_tuples(extract_tuples(
            document,
            doc_id,
            &self.paths,
            self.config.extract_options(),
        )?);

        let mut handles = Vec::with_capacity(tuples.len());
        for tuple in &tuples {
            match IndexElement::from_tuple(doc_id, tuple).and_then(|e| self.arena.allocate(e)) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    self.release(&handles);
                    return Err(err);
                }
            }
        }
        Ok(handles)
    }

    /// Return element storage to a recycling arena; a bulk-only arena keeps
    /// it until truncate.
    fn release(&mut self, handles: &[ElementRef]) {
        if !self.arena.supports_deallocate() {
            return;
        }
        for handle in handles {
            // Handles passed here are live and no longer referenced by the table.
            let _ = self.arena.deallocate(*handle);
        }
    }

    /// Index one document.
    ///
    /// Fails without changing the index; in particular no tuple of a
    /// partially inserted document remains.
    pub fn insert<R>(&mut self, store: &R, doc_id: DocumentId) -> IndexResult<()>
    where
        R: DocumentResolver + ?Sized,
    {
        let handles = match self.build_elements(store, doc_id) {
            Ok(handles) => handles,
            Err(err) => {
                self.report_failure(doc_id, &err);
                return Err(err);
            }
        };
        if handles.is_empty() {
            return Ok(());
        }

        let unique = self.is_unique();
        let mut inserted = Vec::with_capacity(handles.len());
        let mut discarded = Vec::new();
        let mut failure = None;

        let helper = ElementHelper::new(&self.arena, store);
        for &handle in &handles {
            match with_table!(&mut self.mode, t => t.insert(&helper, handle, false, true)) {
                Ok(None) => inserted.push(handle),
                // Multi: identical element already stored
                Ok(Some(_)) if !unique => discarded.push(handle),
                Ok(Some(existing)) => match helper.identity(&existing) {
                    Ok(owner) if owner == doc_id || self.is_rollback => discarded.push(handle),
                    Ok(owner) => {
                        failure = Some(IndexError::unique_violation(owner));
                        break;
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                },
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            for handle in inserted.iter().rev() {
                // The elements were just inserted and resolve like before.
                let _ = with_table!(&mut self.mode, t => t.remove(&helper, handle));
            }
            if !inserted.is_empty() {
                self.metrics.increment_rollbacks();
                let id = self.id.to_string();
                let doc = doc_id.to_string();
                let count = inserted.len().to_string();
                log_event(
                    Event::Rollback,
                    &[
                        ("index", id.as_str()),
                        ("document", doc.as_str()),
                        ("elements", count.as_str()),
                    ],
                );
            }
            self.release(&handles);
            self.note_resizes();
            self.report_failure(doc_id, &err);
            return Err(err);
        }

        self.metrics.add_inserts(inserted.len() as u64);
        if !inserted.is_empty() {
            self.documents.entry(doc_id).or_default().extend(inserted);
        }
        self.release(&discarded);
        self.note_resizes();
        Ok(())
    }

    /// Remove every element of a document; returns how many were removed.
    pub fn remove<R>(&mut self, store: &R, doc_id: DocumentId) -> IndexResult<usize>
    where
        R: DocumentResolver + ?Sized,
    {
        let Some(handles) = self.documents.remove(&doc_id) else {
            return Ok(0);
        };

        let helper = ElementHelper::new(&self.arena, store);
        let mut removed = 0;
        let mut failure = None;
        for (position, handle) in handles.iter().enumerate() {
            match with_table!(&mut self.mode, t => t.remove(&helper, handle)) {
                Ok(Some(_)) => removed += 1,
                Ok(None) => {}
                Err(err) => {
                    failure = Some((position, err));
                    break;
                }
            }
        }

        self.metrics.add_removes(removed as u64);
        if let Some((position, err)) = failure {
            // Elements from `position` on are still stored.
            self.documents.insert(doc_id, handles[position..].to_vec());
            self.release(&handles[..position]);
            self.report_failure(doc_id, &err);
            return Err(err);
        }

        self.release(&handles);
        Ok(removed)
    }

    /// Index many documents on up to `threads` workers (0 = configured
    /// default). Documents already indexed are skipped.
    ///
    /// Extraction and allocation run on the calling thread, the table load
    /// runs in parallel. On failure the index is left as it was. Returns
    /// the number of elements stored.
    pub fn batch_insert<R>(
        &mut self,
        store: &R,
        doc_ids: &[DocumentId],
        threads: usize,
    ) -> IndexResult<usize>
    where
        R: DocumentResolver + Sync + ?Sized,
    {
        let threads = if threads == 0 { self.config.bulk_load_threads } else { threads };
        let id = self.id.to_string();
        let requested = doc_ids.len().to_string();
        let thread_count = threads.to_string();
        let scope = ObservationScope::with_fields(
            BULK_LOAD_SCOPE,
            &[
                ("index", id.as_str()),
                ("documents", requested.as_str()),
                ("threads", thread_count.as_str()),
            ],
        );

        let mut owners: Vec<(DocumentId, ElementRef)> = Vec::new();
        let mut seen = HashSet::new();
        for &doc_id in doc_ids {
            if self.documents.contains_key(&doc_id) || !seen.insert(doc_id) {
                continue;
            }
            match self.build_elements(store, doc_id) {
                Ok(handles) => owners.extend(handles.into_iter().map(|h| (doc_id, h))),
                Err(err) => {
                    let allocated: Vec<ElementRef> = owners.iter().map(|(_, h)| *h).collect();
                    self.release(&allocated);
                    self.report_failure(doc_id, &err);
                    fail_scope(scope, &err);
                    return Err(err);
                }
            }
        }

        let elements: Vec<ElementRef> = owners.iter().map(|(_, h)| *h).collect();
        let result = self.load_elements(store, &elements, threads);
        self.note_resizes();

        match result {
            Ok(rejected) => {
                let rejected: HashSet<ElementRef> = rejected.into_iter().collect();
                let mut stored = 0;
                for (doc_id, handle) in owners {
                    if !rejected.contains(&handle) {
                        self.documents.entry(doc_id).or_default().push(handle);
                        stored += 1;
                    }
                }
                let rejected: Vec<ElementRef> = rejected.into_iter().collect();
                self.release(&rejected);

                self.metrics.add_inserts(stored as u64);
                self.metrics.increment_bulk_loads();
                let elements = stored.to_string();
                scope.complete_with_fields(&[("elements", elements.as_str())]);
                Ok(stored)
            }
            Err(err) => {
                self.release(&elements);
                self.metrics.increment_rollbacks();
                if err.is_unique_violation() {
                    self.metrics.increment_unique_violations();
                }
                fail_scope(scope, &err);
                Err(err)
            }
        }
    }

    fn load_elements<R>(
        &mut self,
        store: &R,
        elements: &[ElementRef],
        threads: usize,
    ) -> IndexResult<Vec<ElementRef>>
    where
        R: DocumentResolver + Sync + ?Sized,
    {
        with_table!(&mut self.mode, t => t.reserve(elements.len()))?;

        let helper = ElementHelper::new(&self.arena, store);
        let is_rollback = self.is_rollback;
        match &mut self.mode {
            IndexMode::Unique(table) => {
                table.batch_insert(&helper, elements, threads, |new, existing| {
                    let owner = helper.identity(existing)?;
                    if is_rollback || owner == helper.identity(new)? {
                        Ok(())
                    } else {
                        Err(IndexError::unique_violation(owner))
                    }
                })
            }
            IndexMode::Multi(table) => {
                table.batch_insert(&helper, elements, threads, |_, _| Ok(()))
            }
        }
    }

    fn encode_key(&self, values: &[Value]) -> IndexResult<IndexKey> {
        if values.len() != self.paths.len() {
            return Err(IndexError::bad_parameter(format!(
                "lookup key has {} values, index has {} fields",
                values.len(),
                self.paths.len()
            )));
        }
        IndexKey::from_json(values)
    }

    /// Raw handles of one lookup page
    pub(crate) fn lookup_handles<R>(
        &self,
        store: &R,
        key: &IndexKey,
        limit: usize,
        cursor: Option<LookupCursor>,
    ) -> IndexResult<Vec<ElementRef>>
    where
        R: DocumentResolver + ?Sized,
    {
        self.metrics.increment_lookups();
        let helper = ElementHelper::new(&self.arena, store);
        let Some(cursor) = cursor else {
            return with_table!(&self.mode, t => t.lookup_by_key(&helper, key, limit));
        };
        // The handle may have been freed and reused by another document.
        let current = self.arena.get(cursor.last()).map(IndexElement::identity);
        if current != Some(cursor.identity()) {
            return Ok(Vec::new());
        }
        with_table!(&self.mode, t => t.lookup_by_key_continue(&helper, key, &cursor.last(), limit))
    }

    pub(crate) fn identities(&self, handles: &[ElementRef]) -> IndexResult<Vec<DocumentId>> {
        handles
            .iter()
            .map(|handle| {
                self.arena
                    .get(*handle)
                    .map(IndexElement::identity)
                    .ok_or_else(|| dangling(handle))
            })
            .collect()
    }

    /// Documents stored under `key`, at most `limit` (0 = all).
    ///
    /// Pass the cursor of a full page to fetch the next one.
    pub fn lookup<R>(
        &self,
        store: &R,
        key: &[Value],
        limit: usize,
        cursor: Option<LookupCursor>,
    ) -> IndexResult<LookupPage>
    where
        R: DocumentResolver + ?Sized,
    {
        let key = self.encode_key(key)?;
        let handles = self.lookup_handles(store, &key, limit, cursor)?;
        let ids = self.identities(&handles)?;
        let cursor = if limit > 0 && handles.len() == limit {
            LookupCursor::after(&handles, &ids)
        } else {
            None
        };
        Ok(LookupPage { ids, cursor })
    }

    /// Iterate the documents of several keys, `batch_size` elements per
    /// table lookup. Repeated keys are visited once.
    pub fn iter<'a, R>(
        &'a self,
        store: &'a R,
        keys: &[Vec<Value>],
        batch_size: usize,
    ) -> IndexResult<HashIndexIterator<'a, R>>
    where
        R: DocumentResolver + ?Sized,
    {
        let mut encoded: Vec<IndexKey> = Vec::with_capacity(keys.len());
        for values in keys {
            let key = self.encode_key(values)?;
            if !encoded.iter().any(|k| k.equals(&key)) {
                encoded.push(key);
            }
        }
        Ok(HashIndexIterator::new(self, store, encoded, batch_size))
    }

    /// Move the elements of `old` to the new revision `new` in place.
    ///
    /// Unique indexes only. Applies when `new` projects to exactly the keys
    /// of `old`; returns false, changing nothing, otherwise. Both revisions
    /// must be resolvable.
    pub fn update_revision<R>(
        &mut self,
        store: &R,
        old: DocumentId,
        new: DocumentId,
    ) -> IndexResult<bool>
    where
        R: DocumentResolver + ?Sized,
    {
        if !self.is_unique() {
            return Err(IndexError::bad_parameter(
                "in-place revision update requires a unique index",
            ));
        }
        let Some(handles) = self.documents.get(&old).cloned() else {
            return Ok(false);
        };
        if old == new || self.documents.contains_key(&new) {
            return Ok(false);
        }

        let document = store
            .resolve(new)
            .ok_or_else(|| IndexError::document_not_found(new, "resolver has no such document"))?;
        let options = self.config.extract_options();
        let tuples = distinct_tuples(extract_tuples(document, new, &self.paths, options)?);
        if tuples.len() != handles.len() {
            return Ok(false);
        }

        let mut claimed = vec![false; tuples.len()];
        let mut updates = Vec::with_capacity(handles.len());
        for handle in &handles {
            let element = self.arena.get(*handle).ok_or_else(|| dangling(handle))?;
            let mut matched = None;
            for (t, tuple) in tuples.iter().enumerate() {
                if !claimed[t] && tuple_matches(element, tuple, store)? {
                    matched = Some(t);
                    break;
                }
            }
            let Some(t) = matched else {
                return Ok(false);
            };
            claimed[t] = true;
            let sub_values = tuples[t]
                .iter()
                .map(SubValue::from_index_value)
                .collect::<IndexResult<Vec<_>>>()?;
            updates.push((*handle, sub_values));
        }

        // Unique tables hold heads only, whose cached hash is the unchanged key hash.
        for (handle, sub_values) in updates {
            if let Some(element) = self.arena.get_mut(handle) {
                element.set_identity(new);
                element.set_sub_values(sub_values);
            }
        }
        self.documents.remove(&old);
        self.documents.insert(new, handles);

        let id = self.id.to_string();
        let (from, to) = (old.to_string(), new.to_string());
        log_event(
            Event::RevisionUpdated,
            &[("index", id.as_str()), ("from", from.as_str()), ("to", to.as_str())],
        );
        Ok(true)
    }

    /// Drop all elements.
    pub fn truncate(&mut self) -> IndexResult<()> {
        with_table!(&mut self.mode, t => t.truncate())?;
        self.arena.clear();
        self.documents.clear();
        self.resizes_seen = with_table!(&self.mode, t => t.resizes());

        let id = self.id.to_string();
        log_event(Event::IndexTruncated, &[("index", id.as_str())]);
        Ok(())
    }

    /// Number of stored elements
    pub fn len(&self) -> usize {
        with_table!(&self.mode, t => t.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of indexed documents
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Approximate bytes held by table, elements and bookkeeping
    pub fn memory_usage(&self) -> usize {
        let table = with_table!(&self.mode, t => t.memory_usage());
        let tracking = self.documents.capacity()
            * (std::mem::size_of::<DocumentId>() + std::mem::size_of::<Vec<ElementRef>>())
            + self
                .documents
                .values()
                .map(|handles| handles.capacity() * std::mem::size_of::<ElementRef>())
                .sum::<usize>();
        table + self.arena.memory_usage() + tracking
    }

    /// Distinct keys per stored element; 1.0 when empty or unique.
    pub fn selectivity_estimate(&self) -> f64 {
        let (len, collisions) = with_table!(&self.mode, t => (t.len(), t.collisions()));
        if self.is_unique() || len == 0 {
            return 1.0;
        }
        (len - collisions) as f64 / len as f64
    }

    /// Bucket the lookup key `key` maps to
    pub fn bucket_for_key(&self, key: &[Value]) -> IndexResult<usize> {
        let key = self.encode_key(key)?;
        Ok(with_table!(&self.mode, t => t.bucket_for_hash(key.hash())))
    }

    /// Rebuild one bucket with `new_capacity` slots.
    pub fn resize_bucket(&mut self, bucket: usize, new_capacity: usize) -> IndexResult<()> {
        with_table!(&mut self.mode, t => t.resize_bucket(bucket, new_capacity))?;
        self.note_resizes();
        Ok(())
    }

    pub fn bucket_stats(&self) -> Vec<BucketStats> {
        with_table!(&self.mode, t => t.bucket_stats())
    }

    /// Verify the structural invariants of the table.
    pub fn check_invariants<R>(&self, store: &R) -> Result<(), InvariantViolation>
    where
        R: DocumentResolver + ?Sized,
    {
        let helper = ElementHelper::new(&self.arena, store);
        with_table!(&self.mode, t => t.check_invariants(&helper))
    }

    pub fn describe(&self) -> IndexDescription {
        IndexDescription {
            id: self.id,
            index_type: "hash",
            fields: self.config.fields.clone(),
            unique: self.config.unique,
            sparse: self.config.sparse,
            deduplicate: self.config.deduplicate,
            allow_partial: self.config.allow_partial,
            elements: self.len(),
            documents: self.document_count(),
            buckets: self.config.num_buckets,
            memory_usage: self.memory_usage(),
            selectivity_estimate: self.selectivity_estimate(),
        }
    }

    fn note_resizes(&mut self) {
        let total = with_table!(&self.mode, t => t.resizes());
        if total > self.resizes_seen {
            self.metrics.add_resizes((total - self.resizes_seen) as u64);
            self.resizes_seen = total;
            let id = self.id.to_string();
            let count = total.to_string();
            log_event(
                Event::BucketResized,
                &[("index", id.as_str()), ("total_resizes", count.as_str())],
            );
        }
    }

    fn report_failure(&self, doc_id: DocumentId, err: &IndexError) {
        let id = self.id.to_string();
        let doc = doc_id.to_string();
        match err.code() {
            IndexErrorCode::AeroIndexUniqueViolation => {
                self.metrics.increment_unique_violations();
                let conflicting = err.conflicting().map(|c| c.to_string()).unwrap_or_default();
                log_event(
                    Event::UniqueViolation,
                    &[
                        ("index", id.as_str()),
                        ("document", doc.as_str()),
                        ("conflicting", conflicting.as_str()),
                    ],
                );
            }
            IndexErrorCode::AeroIndexDocumentNotFound => {
                log_event(
                    Event::DocumentNotFound,
                    &[
                        ("index", id.as_str()),
                        ("document", doc.as_str()),
                        ("reason", err.message()),
                    ],
                );
            }
            IndexErrorCode::AeroIndexOutOfMemory | IndexErrorCode::AeroIndexBadParameter => {}
        }
    }
}

fn fail_scope(scope: ObservationScope<'_>, err: &IndexError) {
    let reason = err.to_string();
    if err.is_fatal() {
        scope.fail_fatal(&reason);
    } else {
        scope.fail(&reason);
    }
}

/// Drop tuples equal to an earlier tuple of the same document.
fn distinct_tuples(tuples: Vec<IndexTuple<'_>>) -> Vec<IndexTuple<'_>> {
    let mut seen: HashMap<u64, Vec<usize>> = HashMap::new();
    let mut out: Vec<IndexTuple<'_>> = Vec::with_capacity(tuples.len());
    for tuple in tuples {
        let hash = hash_slices(tuple.iter().map(|v| v.as_slice()));
        let candidates = seen.entry(hash).or_default();
        let duplicate = candidates.iter().any(|&i| {
            out[i]
                .iter()
                .zip(tuple.iter())
                .all(|(a, b)| a.as_slice().equals(&b.as_slice()))
        });
        if !duplicate {
            candidates.push(out.len());
            out.push(tuple);
        }
    }
    out
}

fn dangling(handle: &ElementRef) -> IndexError {
    IndexError::bad_parameter(format!("dangling element handle {:?}", handle))
}

fn tuple_matches<R>(
    element: &IndexElement,
    tuple: &IndexTuple<'_>,
    resolver: &R,
) -> IndexResult<bool>
where
    R: DocumentResolver + ?Sized,
{
    if element.arity() != tuple.len() {
        return Ok(false);
    }
    for (i, value) in tuple.iter().enumerate() {
        if !element.slice(i, resolver)?.equals(&value.as_slice()) {
            return Ok(false);
        }
    }
    Ok(true)
}
