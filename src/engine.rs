//! Snapshot workflows: take, restore, delete.
//!
//! The catalog is only ever written after the physical operation it
//! describes has succeeded, so a catalog row always points at a database
//! that existed at the time of writing. Failures abort the workflow where
//! they happen; completed steps are never rolled back.

use crate::catalog::{self, CatalogStore, Snapshot};
use crate::error::{BurrowError, Result};
use crate::server::ServerOps;

pub struct Engine<'a> {
    server: &'a mut dyn ServerOps,
    catalog: &'a mut dyn CatalogStore,
    working_database: String,
    project: String,
}

impl<'a> Engine<'a> {
    pub fn new(
        server: &'a mut dyn ServerOps,
        catalog: &'a mut dyn CatalogStore,
        working_database: &str,
        project: &str,
    ) -> Self {
        Self {
            server,
            catalog,
            working_database: working_database.to_string(),
            project: project.to_string(),
        }
    }

    /// This project's snapshots, newest first.
    pub fn snapshots(&mut self) -> Result<Vec<Snapshot>> {
        self.catalog.list(&self.project)
    }

    pub fn resolve(&mut self, name: &str) -> Result<Snapshot> {
        self.snapshots()?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                BurrowError::NotFound(format!(
                    "snapshot '{name}' not found in project '{}'",
                    self.project
                ))
            })
    }

    pub fn latest(&mut self) -> Result<Snapshot> {
        self.snapshots()?.into_iter().next().ok_or_else(|| {
            BurrowError::NotFound(format!(
                "no snapshots in project '{}', run 'burrow snapshot'",
                self.project
            ))
        })
    }

    /// Copies the working database into a fresh `burrow_<hash>` database,
    /// then records it in the catalog.
    pub fn take_snapshot(&mut self, name: &str) -> Result<Snapshot> {
        // 1) Refuse duplicate names before touching the server
        if self.snapshots()?.iter().any(|s| s.name == name) {
            return Err(BurrowError::Conflict(format!(
                "snapshot '{name}' already exists in project '{}'",
                self.project
            )));
        }

        let hash = catalog::new_hash();
        let physical = catalog::physical_name(&hash);

        // 2) A database with open sessions cannot serve as a template
        self.server.terminate_sessions(&self.working_database)?;

        // 3) Physical copy first
        self.server.copy_database(&self.working_database, &physical)?;

        // 4) Record it. The copy exists by now, so a failure here leaves an
        //    orphaned database and must say so.
        self.catalog.insert(&hash, name, &self.project).map_err(|e| {
            BurrowError::CatalogInconsistency(format!(
                "snapshot copy '{physical}' exists but could not be recorded: {e}"
            ))
        })
    }

    /// Replaces the working database with a template copy of the snapshot.
    pub fn restore_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let physical = snapshot.physical_name();

        // 1) A stale catalog row must not cost us the working database
        if !self.server.database_exists(&physical)? {
            return Err(BurrowError::CatalogInconsistency(format!(
                "snapshot '{}' points at '{physical}' which does not exist on the server",
                snapshot.name
            )));
        }

        // 2) Close sessions on both sides, then drop the working database
        self.server.terminate_sessions(&physical)?;
        self.server.terminate_sessions(&self.working_database)?;
        if self.server.database_exists(&self.working_database)? {
            self.server.drop_database(&self.working_database)?;
        }

        // 3) The copy is the step that must not fail now: the drop has
        //    already happened and only the snapshot holds the data.
        self.server
            .copy_database(&physical, &self.working_database)
            .map_err(|e| BurrowError::RestoreInterrupted {
                working: self.working_database.clone(),
                snapshot: snapshot.name.clone(),
                source: Box::new(e),
            })
    }

    /// Drops the snapshot's physical database, then its catalog row. When
    /// the drop fails the row is kept, so the snapshot stays visible.
    pub fn delete_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let physical = snapshot.physical_name();

        self.server.terminate_sessions(&physical)?;
        match self.server.drop_database(&physical) {
            Ok(()) => {}
            // Already gone: the end state we wanted, clean up the row
            Err(BurrowError::NotFound(_)) => {
                tracing::debug!("'{}' was already absent, removing its row", physical);
            }
            Err(e) => return Err(e),
        }

        self.catalog.delete_by_id(snapshot.id).map_err(|e| {
            BurrowError::CatalogInconsistency(format!(
                "database '{physical}' was dropped but its catalog row remains: {e}"
            ))
        })
    }
}
