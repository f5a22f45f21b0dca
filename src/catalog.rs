//! Snapshot catalog, kept in its own tracker database on the same server.

use chrono::NaiveDateTime;
use postgres::Client;
use postgres::error::SqlState;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{BurrowError, Result};
use crate::server::{self, ServerOps};

/// Database holding the `snapshots` table. Its name doubles as the prefix
/// of every physical snapshot database.
pub const TRACKER_DATABASE: &str = "burrow";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS snapshots (\
        id SERIAL PRIMARY KEY, \
        hash TEXT UNIQUE NOT NULL, \
        name TEXT NOT NULL, \
        project TEXT NOT NULL, \
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP, \
        UNIQUE (project, name))";

/// One catalog row. The physical database name is always derived from the
/// hash, never stored.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: i32,
    pub hash: String,
    pub name: String,
    pub project: String,
    pub created_at: NaiveDateTime,
}

impl Snapshot {
    pub fn physical_name(&self) -> String {
        physical_name(&self.hash)
    }

    fn from_row(row: &postgres::Row) -> Self {
        Self {
            id: row.get("id"),
            hash: row.get("hash"),
            name: row.get("name"),
            project: row.get("project"),
            created_at: row.get("created_at"),
        }
    }
}

/// Name of the physical database backing a snapshot: `burrow_<hash>`.
pub fn physical_name(hash: &str) -> String {
    format!("{TRACKER_DATABASE}_{hash}")
}

/// A fresh collision-free snapshot hash (32 lowercase hex characters).
pub fn new_hash() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Catalog operations the snapshot workflows are built on.
pub trait CatalogStore {
    /// Rows for one project, newest first.
    fn list(&mut self, project: &str) -> Result<Vec<Snapshot>>;
    /// Records a snapshot; id and created_at are assigned by the store.
    fn insert(&mut self, hash: &str, name: &str, project: &str) -> Result<Snapshot>;
    fn delete_by_id(&mut self, id: i32) -> Result<()>;
}

/// Creates the tracker database if missing. Returns true when it had to
/// be created. The schema itself is applied by [`PgCatalog::open`].
pub fn ensure_tracker(server: &mut dyn ServerOps) -> Result<bool> {
    if server.database_exists(TRACKER_DATABASE)? {
        return Ok(false);
    }
    server.create_database(TRACKER_DATABASE)?;
    tracing::debug!("tracker database '{}' created", TRACKER_DATABASE);
    Ok(true)
}

/// Catalog over a live connection to the tracker database.
pub struct PgCatalog {
    client: Client,
}

impl PgCatalog {
    /// Connects to the tracker and makes sure the snapshots table exists,
    /// so a half-bootstrapped tracker repairs itself.
    pub fn open(settings: &Settings) -> Result<Self> {
        let mut client = server::connect(settings, TRACKER_DATABASE)?;
        client.batch_execute(SCHEMA)?;
        Ok(Self { client })
    }
}

impl CatalogStore for PgCatalog {
    fn list(&mut self, project: &str) -> Result<Vec<Snapshot>> {
        let rows = self.client.query(
            "SELECT id, hash, name, project, created_at FROM snapshots \
             WHERE project = $1 ORDER BY created_at DESC, id DESC",
            &[&project],
        )?;
        Ok(rows.iter().map(Snapshot::from_row).collect())
    }

    fn insert(&mut self, hash: &str, name: &str, project: &str) -> Result<Snapshot> {
        let row = self
            .client
            .query_one(
                "INSERT INTO snapshots (hash, name, project) VALUES ($1, $2, $3) \
                 RETURNING id, created_at",
                &[&hash, &name, &project],
            )
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    BurrowError::Conflict(format!(
                        "snapshot '{name}' already exists in project '{project}'"
                    ))
                } else {
                    BurrowError::Pg(e)
                }
            })?;
        Ok(Snapshot {
            id: row.get("id"),
            hash: hash.to_string(),
            name: name.to_string(),
            project: project.to_string(),
            created_at: row.get("created_at"),
        })
    }

    fn delete_by_id(&mut self, id: i32) -> Result<()> {
        let deleted = self
            .client
            .execute("DELETE FROM snapshots WHERE id = $1", &[&id])?;
        if deleted == 0 {
            return Err(BurrowError::NotFound(format!(
                "snapshot id {id} is no longer in the catalog"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::validate_identifier;
    use std::collections::HashSet;

    #[test]
    fn physical_names_carry_the_tracker_prefix() {
        assert_eq!(physical_name("0a1b2c"), "burrow_0a1b2c");
        let snap = Snapshot {
            id: 1,
            hash: "deadbeef".into(),
            name: "before-migration".into(),
            project: "testproject".into(),
            created_at: NaiveDateTime::default(),
        };
        assert_eq!(snap.physical_name(), "burrow_deadbeef");
    }

    #[test]
    fn hashes_form_valid_identifiers() {
        let hash = new_hash();
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(validate_identifier(&physical_name(&hash)).is_ok());
    }

    #[test]
    fn ten_thousand_hashes_do_not_collide() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(new_hash()));
        }
    }
}
