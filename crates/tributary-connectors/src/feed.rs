//! Feed descriptors.
//!
//! A [`Feed`] is the unit of work handed to the extraction engine: either a
//! single stream (a table or view) or a global feed that covers many streams
//! at once and is handled outside partitioned extraction.

use std::fmt;

use tributary_core::query::{Field, TableName};

/// Identity of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    /// Schema or database the stream lives in.
    pub namespace: Option<String>,
    /// Stream (table) name.
    pub name: String,
}

impl StreamId {
    /// Creates a stream id.
    #[must_use]
    pub fn new(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Returns the table this stream reads from.
    #[must_use]
    pub fn table_name(&self) -> TableName {
        TableName::new(self.namespace.clone(), self.name.clone())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// How a stream is synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Read every row.
    FullRefresh,
    /// Read rows whose cursor is beyond the last checkpoint.
    Incremental,
}

/// A single stream to extract.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFeed {
    /// Stream identity.
    pub id: StreamId,
    /// Selected columns, in output order.
    pub fields: Vec<Field>,
    /// Primary key columns, possibly empty.
    pub primary_key: Vec<Field>,
    /// Cursor column for incremental syncs.
    pub cursor: Option<Field>,
    /// Configured sync mode.
    pub sync_mode: SyncMode,
}

impl StreamFeed {
    /// Creates a full-refresh feed with no primary key.
    #[must_use]
    pub fn new(id: StreamId, fields: Vec<Field>) -> Self {
        Self {
            id,
            fields,
            primary_key: Vec::new(),
            cursor: None,
            sync_mode: SyncMode::FullRefresh,
        }
    }

    /// Sets the primary key.
    #[must_use]
    pub fn with_primary_key(mut self, primary_key: Vec<Field>) -> Self {
        self.primary_key = primary_key;
        self
    }

    /// Switches to incremental sync on `cursor`.
    #[must_use]
    pub fn incremental(mut self, cursor: Field) -> Self {
        self.cursor = Some(cursor);
        self.sync_mode = SyncMode::Incremental;
        self
    }

    /// Returns the position of `column` in the selected fields.
    #[must_use]
    pub fn field_index(&self, column: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.id == column)
    }
}

/// Unit of work for the extraction engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Feed {
    /// One stream, extracted through partitions.
    Stream(StreamFeed),
    /// A feed spanning many streams (e.g. a change log). Not partitioned.
    Global {
        /// Streams covered by the feed.
        streams: Vec<StreamId>,
    },
}

impl Feed {
    /// Returns a label identifying the feed in logs and handles.
    ///
    /// A global feed is labelled by the streams it covers, e.g.
    /// `global[public.a,public.b]`.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Feed::Stream(stream) => stream.id.to_string(),
            Feed::Global { streams } => {
                let streams: Vec<String> = streams.iter().map(ToString::to_string).collect();
                format!("global[{}]", streams.join(","))
            }
        }
    }

    /// Returns `true` for global feeds.
    #[must_use]
    pub fn is_global(&self) -> bool {
        matches!(self, Feed::Global { .. })
    }
}
