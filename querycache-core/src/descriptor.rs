//! Query descriptors handed to the cache by the host's query pipeline.

use serde::{Deserialize, Serialize};

/// Shape the caller wants the results materialized in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputShape {
    /// Full row objects.
    #[default]
    FullRows,
    /// Only the identifier column.
    IdsOnly,
}

/// Immutable description of one query about to be executed.
///
/// Built with [`QueryDescriptor::new`] and the `with_*` methods:
///
/// ```
/// use querycache_core::{OutputShape, QueryDescriptor};
///
/// let descriptor = QueryDescriptor::new("SELECT * FROM posts LIMIT 0, 10")
///     .with_main_query(true)
///     .with_output_shape(OutputShape::IdsOnly)
///     .with_resource_types(["post"]);
/// assert!(descriptor.is_main_query());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    text: String,
    no_found_rows: bool,
    is_main_query: bool,
    output_shape: OutputShape,
    opt_out: bool,
    is_search: bool,
    resource_types: Vec<String>,
}

impl QueryDescriptor {
    /// Create a descriptor for the given canonical query text.
    ///
    /// Defaults: secondary query, full rows, row counting allowed, no
    /// opt-out, not a search, no resource types.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            no_found_rows: false,
            is_main_query: false,
            output_shape: OutputShape::FullRows,
            opt_out: false,
            is_search: false,
            resource_types: Vec::new(),
        }
    }

    /// Explicitly disable row-count tracking.
    pub fn with_no_found_rows(mut self, no_found_rows: bool) -> Self {
        self.no_found_rows = no_found_rows;
        self
    }

    /// Mark as the request's main query.
    pub fn with_main_query(mut self, is_main_query: bool) -> Self {
        self.is_main_query = is_main_query;
        self
    }

    pub fn with_output_shape(mut self, shape: OutputShape) -> Self {
        self.output_shape = shape;
        self
    }

    /// Opt this query out of caching.
    pub fn with_opt_out(mut self, opt_out: bool) -> Self {
        self.opt_out = opt_out;
        self
    }

    pub fn with_search(mut self, is_search: bool) -> Self {
        self.is_search = is_search;
        self
    }

    /// Declare the resource types (post types, tables, ...) the query touches.
    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Canonical query text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn no_found_rows(&self) -> bool {
        self.no_found_rows
    }

    pub fn is_main_query(&self) -> bool {
        self.is_main_query
    }

    pub fn output_shape(&self) -> OutputShape {
        self.output_shape
    }

    pub fn opt_out(&self) -> bool {
        self.opt_out
    }

    pub fn is_search(&self) -> bool {
        self.is_search
    }

    pub fn resource_types(&self) -> &[String] {
        &self.resource_types
    }
}
