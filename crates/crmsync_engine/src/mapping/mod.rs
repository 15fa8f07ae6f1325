//! Bindings between local tables and remote object types.
//!
//! A [`Mapping`] ties one local table to one remote object type: which
//! attributes correspond, how records relate to other mappings, which remote
//! records are in scope, and when remote records are mirrored locally.
//! Mappings are validated against the local schema when built, so a broken
//! configuration fails at startup instead of during a cycle.

mod association;
mod fields;
mod registry;
mod strategy;

pub use association::{Association, AssociationKind};
pub use fields::FieldMap;
pub use registry::Registry;
pub use strategy::BuildStrategy;

use crate::error::{SyncError, SyncResult};
use crmsync_store::{Condition, LocalStore};
use std::collections::HashSet;

/// Remote field carrying the correlation token of an engine-created record.
pub const SYNC_TOKEN_FIELD: &str = "SynchronizationId__c";

/// Fallback lookup column name.
const DEFAULT_LOOKUP_COLUMN: &str = "remote_id";

/// A configured binding between a local table and a remote object type.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    local_type: String,
    remote_type: String,
    fields: FieldMap,
    associations: Vec<Association>,
    conditions: Vec<Condition>,
    strategy: BuildStrategy,
    lookup_column: String,
}

impl Mapping {
    /// Starts building a mapping.
    pub fn builder(local_type: impl Into<String>, remote_type: impl Into<String>) -> MappingBuilder {
        MappingBuilder::new(local_type, remote_type)
    }

    /// Local table name.
    pub fn local_type(&self) -> &str {
        &self.local_type
    }

    /// Remote object type.
    pub fn remote_type(&self) -> &str {
        &self.remote_type
    }

    /// Attribute correspondence.
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Declared associations.
    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    /// Finds an association by name.
    pub fn association(&self, name: &str) -> SyncResult<&Association> {
        self.associations
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| SyncError::UnknownAssociation {
                local_type: self.local_type.clone(),
                name: name.to_owned(),
            })
    }

    /// Remote conditions scoping the mapping.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Build strategy.
    pub fn strategy(&self) -> &BuildStrategy {
        &self.strategy
    }

    /// Local column holding the remote id of the counterpart.
    pub fn lookup_column(&self) -> &str {
        &self.lookup_column
    }

    /// Returns a copy of the mapping with its conditions suspended.
    #[must_use]
    pub fn unscoped(&self) -> Mapping {
        Mapping {
            conditions: Vec::new(),
            ..self.clone()
        }
    }

    /// Builds the correlation token for a local row.
    pub fn sync_token(&self, local_id: i64) -> String {
        format!("{}::{}", self.local_type, local_id)
    }
}

/// Builder for [`Mapping`].
#[derive(Debug, Clone)]
pub struct MappingBuilder {
    local_type: String,
    remote_type: String,
    fields: FieldMap,
    associations: Vec<Association>,
    conditions: Vec<Condition>,
    strategy: BuildStrategy,
    lookup_column: Option<String>,
}

impl MappingBuilder {
    fn new(local_type: impl Into<String>, remote_type: impl Into<String>) -> Self {
        Self {
            local_type: local_type.into(),
            remote_type: remote_type.into(),
            fields: FieldMap::new(),
            associations: Vec::new(),
            conditions: Vec::new(),
            strategy: BuildStrategy::default(),
            lookup_column: None,
        }
    }

    /// Maps a local attribute to a remote field path.
    #[must_use]
    pub fn field(mut self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.fields.insert(local, remote);
        self
    }

    /// Maps several attributes.
    #[must_use]
    pub fn fields<L, R>(mut self, pairs: impl IntoIterator<Item = (L, R)>) -> Self
    where
        L: Into<String>,
        R: Into<String>,
    {
        for (local, remote) in pairs {
            self.fields.insert(local, remote);
        }
        self
    }

    /// Declares an association.
    #[must_use]
    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    /// Scopes the mapping to remote records matching `condition`.
    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Sets the build strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: BuildStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the lookup column instead of inferring it.
    #[must_use]
    pub fn lookup_column(mut self, column: impl Into<String>) -> Self {
        self.lookup_column = Some(column.into());
        self
    }

    /// Validates the mapping against the local schema.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidMapping`] if the table does not exist, the
    /// field map is not a bijection, a mapped attribute or foreign key is not
    /// a column, association names repeat, or no lookup column can be found.
    pub fn build(self, local: &dyn LocalStore) -> SyncResult<Mapping> {
        let invalid = |message: String| {
            SyncError::invalid_mapping(&self.local_type, &self.remote_type, message)
        };

        let columns = local
            .columns(&self.local_type)
            .map_err(|e| invalid(e.to_string()))?;
        let has_column = |column: &str| columns.iter().any(|c| c == column);

        self.fields.check().map_err(invalid)?;
        if let Some(attribute) = self.fields.local_attributes().find(|a| !has_column(a)) {
            return Err(invalid(format!("{attribute} is not a column")));
        }

        let mut names = HashSet::new();
        for association in &self.associations {
            if !names.insert(association.name.as_str()) {
                return Err(invalid(format!(
                    "association {} is declared twice",
                    association.name
                )));
            }
            if association.lookups.is_empty() {
                return Err(invalid(format!(
                    "association {} has no lookup field",
                    association.name
                )));
            }
            if association.kind.foreign_key_on_source() && !has_column(&association.foreign_key) {
                return Err(invalid(format!(
                    "foreign key {} is not a column",
                    association.foreign_key
                )));
            }
        }

        let lookup_column = match self.lookup_column {
            Some(column) if has_column(&column) => column,
            Some(column) => return Err(invalid(format!("lookup column {column} is not a column"))),
            None => {
                let inferred = format!("{}_remote_id", snake_case(&self.remote_type));
                if has_column(&inferred) {
                    inferred
                } else if has_column(DEFAULT_LOOKUP_COLUMN) {
                    DEFAULT_LOOKUP_COLUMN.to_owned()
                } else {
                    return Err(invalid(format!(
                        "no lookup column; expected {inferred} or {DEFAULT_LOOKUP_COLUMN}"
                    )));
                }
            }
        };

        Ok(Mapping {
            local_type: self.local_type,
            remote_type: self.remote_type,
            fields: self.fields,
            associations: self.associations,
            conditions: self.conditions,
            strategy: self.strategy,
            lookup_column,
        })
    }
}

/// `BillingAccount__c` → `billing_account`.
fn snake_case(remote_type: &str) -> String {
    let name = remote_type.strip_suffix("__c").unwrap_or(remote_type);
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower)
            {
                out.push('_');
            }
        }
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.extend(c.to_lowercase());
    }
    out
}
