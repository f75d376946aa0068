//! Operation descriptors submitted to a table

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of mutation, recorded with every log entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperKind {
    Insert = 0,
    Delete = 1,
    Update = 2,
}

impl fmt::Display for OperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Delete => "delete",
            Self::Update => "update",
        })
    }
}

/// Where a mutation takes effect
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OperScope {
    /// Append to the replication log, then apply locally
    #[default]
    Global,
    /// Apply locally only (replay, follower apply)
    Local,
}

/// A single mutation against a table.
///
/// Lives only for the duration of one call; `row_size` is filled in once the
/// row image has been encoded.
#[derive(Debug)]
pub struct SdbOper<R> {
    pub kind: OperKind,
    pub scope: OperScope,
    pub row: R,
    pub row_size: usize,
}

impl<R> SdbOper<R> {
    fn new(kind: OperKind, row: R) -> Self {
        Self {
            kind,
            scope: OperScope::Global,
            row,
            row_size: 0,
        }
    }

    /// Insert `row`
    pub fn insert(row: R) -> Self {
        Self::new(OperKind::Insert, row)
    }

    /// Delete the row keyed like `row`
    pub fn delete(row: R) -> Self {
        Self::new(OperKind::Delete, row)
    }

    /// Overwrite the row keyed like `row` with its fields
    pub fn update(row: R) -> Self {
        Self::new(OperKind::Update, row)
    }

    /// Skip the replication log
    #[must_use]
    pub fn local(mut self) -> Self {
        self.scope = OperScope::Local;
        self
    }
}
