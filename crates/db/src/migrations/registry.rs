//! Migration Registry - the immutable catalog of known migrations.

use std::collections::HashSet;

use super::catalog;
use super::definitions::Migration;
use crate::error::{MigrationError, MigrationResult};

/// Ordered, validated set of migrations known to this build.
///
/// Declaration order is kept as given; planning sorts by id on its own.
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    /// Build a registry, rejecting non-positive ids, duplicate ids and empty names
    pub fn new(migrations: Vec<Migration>) -> MigrationResult<Self> {
        let mut seen = HashSet::with_capacity(migrations.len());

        for migration in &migrations {
            if migration.id <= 0 {
                return Err(MigrationError::InvalidDefinition(format!(
                    "migration id must be positive, got {} ({})",
                    migration.id, migration.name
                )));
            }
            if migration.name.trim().is_empty() {
                return Err(MigrationError::InvalidDefinition(format!(
                    "migration {} has an empty name",
                    migration.id
                )));
            }
            if !seen.insert(migration.id) {
                return Err(MigrationError::InvalidDefinition(format!(
                    "duplicate migration id {}",
                    migration.id
                )));
            }
        }

        Ok(Self { migrations })
    }

    /// The built-in product catalog migrations, tracking into `ledger_table`
    pub fn catalog(ledger_table: &str) -> MigrationResult<Self> {
        Self::new(catalog::product_catalog(ledger_table))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn get(&self, id: i64) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Ids in declaration order
    pub fn ids(&self) -> Vec<i64> {
        self.migrations.iter().map(|m| m.id).collect()
    }
}
