//! When remote records are mirrored locally.

use crate::associations::Links;
use crate::error::SyncResult;
use crate::instance::{Instance, RemoteInstance};
use serde::{Deserialize, Serialize};

/// Decides whether an unlinked remote record gets a local counterpart.
///
/// Strategies only govern remote to local construction. Local records
/// without a remote counterpart are always pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildStrategy {
    /// Build whenever the remote record is unlinked.
    #[default]
    Always,
    /// Never build; the mapping only consumes records built elsewhere.
    Passive,
    /// Build only once the named `BelongsTo` parent is linked locally.
    Associated {
        /// Association name on the same mapping.
        with: String,
    },
}

impl BuildStrategy {
    /// Creates an `Associated` strategy.
    pub fn associated(with: impl Into<String>) -> Self {
        BuildStrategy::Associated { with: with.into() }
    }

    /// Returns true for passive mappings.
    pub fn is_passive(&self) -> bool {
        matches!(self, BuildStrategy::Passive)
    }

    /// Returns true if a local counterpart should be built for `instance`.
    pub fn should_build(&self, instance: &RemoteInstance, links: &Links<'_>) -> SyncResult<bool> {
        match self {
            BuildStrategy::Always => Ok(true),
            BuildStrategy::Passive => Ok(false),
            BuildStrategy::Associated { with } => {
                let association = instance.mapping().association(with)?;
                links.synced_for(association, instance.record())
            }
        }
    }
}
