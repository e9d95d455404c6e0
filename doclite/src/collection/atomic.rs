//! Find-and-modify: select one document and write it in the same
//! transaction scope, so no other writer can slip in between.

use super::{Collection, FindAndModifyOptions, MutationState, ReturnDocument};
use crate::document::Document;
use crate::error::{DocliteError, Result};
use crate::query::Query;
use serde::de::DeserializeOwned;
use serde::Serialize;

impl<T: Serialize + DeserializeOwned> Collection<T> {
    /// Apply `update` to the first document matching `query` (ordered by
    /// `options.sort`, then `_id`) and return the chosen snapshot.
    ///
    /// With `options.upsert` set and no match, `update` is applied to the
    /// seed and the result inserted. The `Before` snapshot of an upsert is
    /// `None`.
    pub fn find_one_and_update<F>(
        &self,
        query: &Query<T>,
        update: F,
        options: FindAndModifyOptions<T>,
    ) -> Result<Option<Document<T>>>
    where
        F: FnOnce(T) -> T,
    {
        let FindAndModifyOptions {
            sort,
            return_document,
            upsert,
        } = options;
        self.mutate(|| match self.first_match(query.filter(), &sort)? {
            Some(row) => {
                self.trace(MutationState::Matched);
                // Decoded twice so `T` need not be `Clone`.
                let before: Document<T> = row.decode()?;
                let current: Document<T> = row.decode()?;
                let after = self.rewrite(&row, update(current.data))?;
                self.trace(MutationState::Applied);
                Ok(Some(match return_document {
                    ReturnDocument::Before => before,
                    ReturnDocument::After => after,
                }))
            }
            None => {
                self.trace(MutationState::NoMatch);
                let Some(seed) = upsert else {
                    return Ok(None);
                };
                let inserted = self.insert_value(update(seed))?;
                self.trace(MutationState::Inserted);
                Ok(match return_document {
                    ReturnDocument::Before => None,
                    ReturnDocument::After => Some(inserted),
                })
            }
        })
    }

    /// Replace the payload of the first matching document, keeping its id
    /// and `createdAt`.
    pub fn find_one_and_replace(
        &self,
        query: &Query<T>,
        replacement: T,
        options: FindAndModifyOptions<T>,
    ) -> Result<Option<Document<T>>> {
        if options.upsert.is_some() {
            return Err(DocliteError::InvalidOperation(
                "find_one_and_replace does not take an upsert seed; use replace_one with upsert".into(),
            ));
        }
        let FindAndModifyOptions {
            sort,
            return_document,
            ..
        } = options;
        self.mutate(|| {
            let Some(row) = self.first_match(query.filter(), &sort)? else {
                self.trace(MutationState::NoMatch);
                return Ok(None);
            };
            self.trace(MutationState::Matched);
            let before: Document<T> = row.decode()?;
            let after = self.rewrite(&row, replacement)?;
            self.trace(MutationState::Applied);
            Ok(Some(match return_document {
                ReturnDocument::Before => before,
                ReturnDocument::After => after,
            }))
        })
    }

    /// Delete the first matching document and return it as it was.
    pub fn find_one_and_delete(
        &self,
        query: &Query<T>,
        options: FindAndModifyOptions<T>,
    ) -> Result<Option<Document<T>>> {
        if options.upsert.is_some() {
            return Err(DocliteError::InvalidOperation(
                "find_one_and_delete cannot upsert".into(),
            ));
        }
        self.mutate(|| {
            let Some(row) = self.first_match(query.filter(), &options.sort)? else {
                self.trace(MutationState::NoMatch);
                return Ok(None);
            };
            self.trace(MutationState::Matched);
            let deleted: Document<T> = row.decode()?;
            self.delete_row(&row.id)?;
            self.trace(MutationState::Applied);
            Ok(Some(deleted))
        })
    }
}
