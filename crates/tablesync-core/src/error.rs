//! Error types for structure synchronization.

/// Errors that can occur while diffing or synchronizing table structures.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A desired or live structure has a shape the differ cannot work with
    /// (an empty key group, a mapping key that disagrees with its value, a
    /// duplicate name in a definition document, ...).
    #[error("Invalid structure for table '{table}': {reason}")]
    StructureInvalid {
        /// Table the structure belongs to.
        table: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The live schema could not be enumerated.
    #[error("Introspection failed{}: {message}", .table.as_ref().map_or_else(String::new, |t| format!(" for table '{t}'")))]
    IntrospectionFailed {
        /// Table being introspected, `None` when listing tables.
        table: Option<String>,
        /// Message reported by the introspector.
        message: String,
    },

    /// The database rejected a DDL statement.
    #[error("Statement failed: {message}\nSQL: {sql}")]
    StatementExecutionFailed {
        /// The statement text, as sent to the database.
        sql: String,
        /// The database's error message, verbatim.
        message: String,
    },
}

impl SyncError {
    pub(crate) fn invalid(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StructureInvalid {
            table: table.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
