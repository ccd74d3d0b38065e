//! Materialized query results.

use serde::{Deserialize, Serialize};

use crate::descriptor::OutputShape;

/// One result row, column name to value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Identifier column value.
pub type RowId = u64;

/// The stored result of one query execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "data", rename_all = "snake_case")]
pub enum QueryPayload {
    Rows(Vec<Row>),
    Ids(Vec<RowId>),
}

impl QueryPayload {
    /// The shape this payload was materialized in.
    pub fn shape(&self) -> OutputShape {
        match self {
            Self::Rows(_) => OutputShape::FullRows,
            Self::Ids(_) => OutputShape::IdsOnly,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Rows(rows) => rows.len(),
            Self::Ids(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_rows(&self) -> Option<&[Row]> {
        match self {
            Self::Rows(rows) => Some(rows),
            Self::Ids(_) => None,
        }
    }

    pub fn as_ids(&self) -> Option<&[RowId]> {
        match self {
            Self::Ids(ids) => Some(ids),
            Self::Rows(_) => None,
        }
    }
}
