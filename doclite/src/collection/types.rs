use crate::document::Document;
use crate::options::SortKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which snapshot a find-and-modify returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnDocument {
    /// The document as it was before the write.
    #[default]
    Before,
    /// The document as stored by the write.
    After,
}

/// Options for `find_one_and_*`.
pub struct FindAndModifyOptions<T> {
    /// Picks the target when several documents match.
    pub sort: Vec<SortKey>,
    pub return_document: ReturnDocument,
    /// Base value for an upsert. When nothing matches, the update transform
    /// is applied to it and the result inserted.
    pub upsert: Option<T>,
}

impl<T> FindAndModifyOptions<T> {
    pub fn new() -> Self {
        FindAndModifyOptions {
            sort: Vec::new(),
            return_document: ReturnDocument::Before,
            upsert: None,
        }
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn return_document(mut self, which: ReturnDocument) -> Self {
        self.return_document = which;
        self
    }

    pub fn return_after(self) -> Self {
        self.return_document(ReturnDocument::After)
    }

    pub fn upsert(mut self, seed: T) -> Self {
        self.upsert = Some(seed);
        self
    }
}

impl<T> Default for FindAndModifyOptions<T> {
    fn default() -> Self {
        FindAndModifyOptions::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for FindAndModifyOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindAndModifyOptions")
            .field("sort", &self.sort)
            .field("return_document", &self.return_document)
            .field("upsert", &self.upsert)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaceOptions {
    /// Insert the replacement when nothing matches.
    pub upsert: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateResult {
    pub matched_count: u64,
    /// Every matched document is rewritten; no-op transforms still count.
    pub modified_count: u64,
    pub upserted_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult<T> {
    pub documents: Vec<Document<T>>,
    pub inserted_count: u64,
}

/// Progress of a single mutation, logged at trace level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MutationState {
    Pending,
    Matched,
    NoMatch,
    Applied,
    Inserted,
    Committed,
    RolledBack,
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationState::Pending => "pending",
            MutationState::Matched => "matched",
            MutationState::NoMatch => "no-match",
            MutationState::Applied => "applied",
            MutationState::Inserted => "inserted",
            MutationState::Committed => "committed",
            MutationState::RolledBack => "rolled-back",
        };
        f.write_str(s)
    }
}
