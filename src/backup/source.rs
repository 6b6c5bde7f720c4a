//! Collaborator seams of a backup run: where descriptors come from and where results go.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::config::UnitConfig;
use crate::error::{Error, Result};
use crate::types::{RemoteAttachment, UnitReport};

/// Enumerates the attachments of a unit (e.g. an attachment query against a feature service)
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    /// List every attachment of `unit`
    ///
    /// Implementations report failures as [`Error::Source`].
    async fn list_attachments(&self, unit: &UnitConfig) -> Result<Vec<RemoteAttachment>>;
}

/// Publishes a finished unit's output somewhere (e.g. zips it onto a hosted item)
#[async_trait]
pub trait ResultAttacher: Send + Sync {
    /// Attach the results described by `report`
    ///
    /// Implementations report failures as [`Error::Attach`].
    async fn attach_results(&self, unit: &UnitConfig, report: &UnitReport) -> Result<()>;
}

/// In-memory [`AttachmentSource`] keyed by unit name
///
/// Useful for replaying an attachment listing exported earlier, and in tests.
#[derive(Clone, Debug, Default)]
pub struct StaticAttachmentSource {
    units: HashMap<String, Vec<RemoteAttachment>>,
}

impl StaticAttachmentSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the listing of one unit
    pub fn with_unit(mut self, unit: impl Into<String>, attachments: Vec<RemoteAttachment>) -> Self {
        self.units.insert(unit.into(), attachments);
        self
    }

    /// Load listings from a JSON object mapping unit names to attachment arrays
    ///
    /// Attachment objects accept both snake_case keys and the upper-case keys of the
    /// feature service response.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let units: HashMap<String, Vec<RemoteAttachment>> = serde_json::from_str(&content)?;
        Ok(Self { units })
    }
}

#[async_trait]
impl AttachmentSource for StaticAttachmentSource {
    async fn list_attachments(&self, unit: &UnitConfig) -> Result<Vec<RemoteAttachment>> {
        self.units
            .get(&unit.name)
            .cloned()
            .ok_or_else(|| Error::Source {
                unit: unit.name.clone(),
                message: "no attachment listing for this unit".to_string(),
            })
    }
}
