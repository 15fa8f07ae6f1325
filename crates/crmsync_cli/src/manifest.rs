//! Mapping manifest: the registry described as JSON.
//!
//! ```json
//! {
//!   "mappings": [
//!     {
//!       "local_type": "contacts",
//!       "remote_type": "Contact",
//!       "fields": { "name": "LastName", "email": "Email" },
//!       "associations": [
//!         { "kind": "belongs_to", "name": "account", "target": "accounts",
//!           "foreign_key": "account_id", "lookups": ["AccountId"] }
//!       ],
//!       "conditions": [{ "op": "eq", "field": "Status", "value": "Active" }],
//!       "strategy": { "type": "associated", "with": "account" }
//!     }
//!   ]
//! }
//! ```

use crate::error::CliError;
use crmsync_engine::{Association, BuildStrategy, Mapping, Registry, SyncResult};
use crmsync_store::{Condition, LocalStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A whole manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Mappings in registration order.
    pub mappings: Vec<MappingEntry>,
}

/// One mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Local table.
    pub local_type: String,
    /// Remote object type.
    pub remote_type: String,
    /// Local attribute to remote field path.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Associations.
    #[serde(default)]
    pub associations: Vec<Association>,
    /// Remote scope.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Build strategy.
    #[serde(default)]
    pub strategy: BuildStrategy,
    /// Lookup column, when it cannot be inferred.
    #[serde(default)]
    pub lookup_column: Option<String>,
}

impl Manifest {
    /// Reads a manifest.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let contents = fs::read(path).map_err(|e| CliError::io(path, e))?;
        serde_json::from_slice(&contents).map_err(|e| CliError::json(path, e))
    }

    /// Builds and validates the registry against the local schema.
    pub fn registry(&self, local: &dyn LocalStore) -> SyncResult<Registry> {
        let mut registry = Registry::new();
        for entry in &self.mappings {
            registry.insert(entry.build(local)?);
        }
        registry.validate()?;
        Ok(registry)
    }
}

impl MappingEntry {
    fn build(&self, local: &dyn LocalStore) -> SyncResult<Mapping> {
        let mut builder = Mapping::builder(&self.local_type, &self.remote_type)
            .fields(self.fields.iter().map(|(l, r)| (l.as_str(), r.as_str())))
            .strategy(self.strategy.clone());
        for association in &self.associations {
            builder = builder.association(association.clone());
        }
        for condition in &self.conditions {
            builder = builder.condition(condition.clone());
        }
        if let Some(column) = &self.lookup_column {
            builder = builder.lookup_column(column);
        }
        builder.build(local)
    }
}
