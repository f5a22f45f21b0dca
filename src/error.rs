//! Error types for burrow operations.

use std::process::ExitStatus;
use thiserror::Error;

/// Primary error type for snapshot and restore operations.
#[derive(Error, Debug)]
pub enum BurrowError {
    #[error("could not connect to database '{database}': {source}")]
    Connection {
        database: String,
        #[source]
        source: postgres::Error,
    },

    /// A resource that must not exist already does (duplicate database,
    /// duplicate snapshot name, database still in use).
    #[error("{0}")]
    Conflict(String),

    /// A snapshot or database that was asked for does not exist.
    #[error("{0}")]
    NotFound(String),

    #[error("'{tool}' was not found; is it installed and on PATH?")]
    ToolMissing { tool: String },

    #[error("{tool} exited with {status}")]
    ToolFailed { tool: String, status: ExitStatus },

    /// The catalog and the server disagree about what exists. Carries a
    /// description of the divergence for manual cleanup.
    #[error("catalog out of sync: {0}")]
    CatalogInconsistency(String),

    /// The working database was dropped but the template copy that should
    /// replace it failed. The snapshot database still holds the data.
    #[error("restore of '{working}' from '{snapshot}' failed after the drop: {source}")]
    RestoreInterrupted {
        working: String,
        snapshot: String,
        #[source]
        source: Box<BurrowError>,
    },

    #[error("invalid identifier '{0}': use letters, digits and underscores, 63 bytes max")]
    InvalidIdentifier(String),

    #[error("{0}")]
    Config(String),

    #[error("remote storage: {0}")]
    Remote(String),

    #[error("database error: {0}")]
    Pg(#[from] postgres::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BurrowError {
    /// Returns a follow-up suggestion for errors the operator can act on.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Config(_) => Some("run 'burrow init' to create or repair .burrow.toml"),
            Self::ToolMissing { .. } => Some("install the PostgreSQL client tools"),
            Self::ToolFailed { tool, .. } if tool == "pg_restore" => {
                Some("the working database may be left partially loaded; fix the cause above and run 'burrow load' again")
            }
            Self::RestoreInterrupted { .. } => {
                Some("the snapshot database is intact; re-run the restore once the server is healthy")
            }
            Self::CatalogInconsistency(_) => {
                Some("inspect the server and the tracker database, then drop whichever side is stale")
            }
            _ => None,
        }
    }
}

/// Convenience alias for Results using BurrowError.
pub type Result<T> = std::result::Result<T, BurrowError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn a_failed_pg_restore_points_back_at_load() {
        let err = BurrowError::ToolFailed {
            tool: "pg_restore".to_string(),
            status: ExitStatus::from_raw(256),
        };
        assert!(err.hint().is_some_and(|h| h.contains("'burrow load'")));
    }

    #[test]
    fn a_failed_pg_dump_carries_no_hint() {
        let err = BurrowError::ToolFailed {
            tool: "pg_dump".to_string(),
            status: ExitStatus::from_raw(256),
        };
        assert!(err.hint().is_none());
    }
}
