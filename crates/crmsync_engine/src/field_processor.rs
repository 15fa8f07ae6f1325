//! Remote field permission filtering.

use crate::error::SyncResult;
use crmsync_store::{Attributes, FieldDescribe, RemoteStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The kind of remote write being prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Creating a record.
    Create,
    /// Updating an existing record.
    Update,
}

/// Filters outgoing remote writes down to the fields the engine's user may
/// set.
///
/// Field metadata is fetched once per object type and kept until
/// [`FieldProcessor::reset`].
pub struct FieldProcessor {
    remote: Arc<dyn RemoteStore>,
    described: RwLock<HashMap<String, Arc<Vec<FieldDescribe>>>>,
}

impl FieldProcessor {
    /// Creates a processor reading metadata from `remote`.
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            described: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the subset of `fields` writable for `action` on `object`.
    pub fn available_fields(
        &self,
        object: &str,
        mut fields: Attributes,
        action: Action,
    ) -> SyncResult<Attributes> {
        let described = self.describe(object)?;
        fields.retain(|name, _| {
            let allowed = described.iter().any(|field| {
                field.name == *name
                    && match action {
                        Action::Create => field.createable,
                        Action::Update => field.updateable,
                    }
            });
            if !allowed {
                debug!(object, field = %name, ?action, "field not writable, dropping");
            }
            allowed
        });
        Ok(fields)
    }

    /// Forgets all cached metadata.
    pub fn reset(&self) {
        self.described.write().clear();
    }

    fn describe(&self, object: &str) -> SyncResult<Arc<Vec<FieldDescribe>>> {
        if let Some(described) = self.described.read().get(object) {
            return Ok(Arc::clone(described));
        }
        let described = Arc::new(self.remote.describe(object)?);
        self.described
            .write()
            .insert(object.to_owned(), Arc::clone(&described));
        Ok(described)
    }
}
