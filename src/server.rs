//! Administrative connection handling and database lifecycle operations.
//!
//! All create/drop/copy statements run against the maintenance database
//! (`postgres`), never against the database being manipulated. Identifiers
//! are validated before they are quoted into DDL; everything else rides in
//! bind parameters.

use std::time::Duration;

use postgres::error::SqlState;
use postgres::{Client, NoTls};

use crate::config::Settings;
use crate::error::{BurrowError, Result};

/// Maintenance database used for create/drop/copy operations.
pub const ADMIN_DATABASE: &str = "postgres";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Server-side operations the snapshot workflows are built on.
pub trait ServerOps {
    fn database_exists(&mut self, database: &str) -> Result<bool>;
    fn create_database(&mut self, database: &str) -> Result<()>;
    fn drop_database(&mut self, database: &str) -> Result<()>;
    /// Creates `to` as a template copy of `from`. Fails while `from` has
    /// open sessions, so callers terminate them first.
    fn copy_database(&mut self, from: &str, to: &str) -> Result<()>;
    /// Force-closes every session on `database`. Idempotent; returns the
    /// number of backends that were terminated.
    fn terminate_sessions(&mut self, database: &str) -> Result<u64>;
}

/// Opens a connection to the given database and verifies it responds.
pub fn connect(settings: &Settings, database: &str) -> Result<Client> {
    let mut client = postgres::Config::new()
        .host(&settings.host)
        .port(settings.port)
        .user(&settings.username)
        .password(&settings.password)
        .dbname(database)
        .connect_timeout(CONNECT_TIMEOUT)
        .connect(NoTls)
        .map_err(|e| BurrowError::Connection {
            database: database.to_string(),
            source: e,
        })?;

    client
        .is_valid(PING_TIMEOUT)
        .map_err(|e| BurrowError::Connection {
            database: database.to_string(),
            source: e,
        })?;

    tracing::debug!("connected to '{}'", database);
    Ok(client)
}

/// Rejects anything that is not a plain lowercase-safe SQL identifier.
/// Validated names contain no quotes, so quoting them into DDL is safe.
pub fn validate_identifier(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let well_formed = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if well_formed && name.len() <= 63 {
        Ok(name)
    } else {
        Err(BurrowError::InvalidIdentifier(name.to_string()))
    }
}

/// Lifecycle operations over a live administrative connection.
pub struct PgServer {
    client: Client,
}

impl PgServer {
    pub fn connect(settings: &Settings) -> Result<Self> {
        Ok(Self {
            client: connect(settings, ADMIN_DATABASE)?,
        })
    }
}

impl ServerOps for PgServer {
    fn database_exists(&mut self, database: &str) -> Result<bool> {
        let row = self.client.query_one(
            "SELECT EXISTS (SELECT FROM pg_catalog.pg_database WHERE lower(datname) = lower($1))",
            &[&database],
        )?;
        Ok(row.get(0))
    }

    fn create_database(&mut self, database: &str) -> Result<()> {
        let query = format!("CREATE DATABASE \"{}\"", validate_identifier(database)?);
        tracing::debug!(%query, "create database");
        self.client
            .batch_execute(&query)
            .map_err(|e| map_admin_error(e, database))
    }

    fn drop_database(&mut self, database: &str) -> Result<()> {
        let query = format!("DROP DATABASE \"{}\"", validate_identifier(database)?);
        tracing::debug!(%query, "drop database");
        self.client
            .batch_execute(&query)
            .map_err(|e| map_admin_error(e, database))
    }

    fn copy_database(&mut self, from: &str, to: &str) -> Result<()> {
        let query = format!(
            "CREATE DATABASE \"{}\" WITH TEMPLATE \"{}\"",
            validate_identifier(to)?,
            validate_identifier(from)?
        );
        tracing::debug!(%query, "copy database");
        self.client.batch_execute(&query).map_err(|e| {
            let code = e.code();
            if code == Some(&SqlState::DUPLICATE_DATABASE) {
                BurrowError::Conflict(format!("database '{to}' already exists"))
            } else if code == Some(&SqlState::OBJECT_IN_USE) {
                BurrowError::Conflict(format!(
                    "template database '{from}' is in use by other sessions"
                ))
            } else if code == Some(&SqlState::INVALID_CATALOG_NAME) {
                BurrowError::NotFound(format!("database '{from}' does not exist"))
            } else {
                BurrowError::Pg(e)
            }
        })
    }

    fn terminate_sessions(&mut self, database: &str) -> Result<u64> {
        let rows = self.client.query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1",
            &[&database],
        )?;
        let count = rows.len() as u64;
        if count > 0 {
            tracing::debug!("terminated {} session(s) on '{}'", count, database);
        }
        Ok(count)
    }
}

fn map_admin_error(err: postgres::Error, database: &str) -> BurrowError {
    let code = err.code();
    if code == Some(&SqlState::DUPLICATE_DATABASE) {
        BurrowError::Conflict(format!("database '{database}' already exists"))
    } else if code == Some(&SqlState::INVALID_CATALOG_NAME) {
        BurrowError::NotFound(format!("database '{database}' does not exist"))
    } else if code == Some(&SqlState::OBJECT_IN_USE) {
        BurrowError::Conflict(format!("database '{database}' is in use by other sessions"))
    } else {
        BurrowError::Pg(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(validate_identifier("devproject").is_ok());
        assert!(validate_identifier("_staging").is_ok());
        assert!(validate_identifier("burrow_0a1b2c").is_ok());
        assert!(validate_identifier("Db2").is_ok());
    }

    #[test]
    fn rejects_quoting_and_injection_attempts() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("9lives").is_err());
        assert!(validate_identifier("my-db").is_err());
        assert!(validate_identifier("db\"; DROP DATABASE x; --").is_err());
        assert!(validate_identifier("sp ace").is_err());
        assert!(validate_identifier("sémaphore").is_err());
    }

    #[test]
    fn enforces_the_63_byte_limit() {
        let just_fits = "a".repeat(63);
        let too_long = "a".repeat(64);
        assert!(validate_identifier(&just_fits).is_ok());
        assert!(validate_identifier(&too_long).is_err());
    }
}
