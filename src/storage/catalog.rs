//! Reference label catalog
//!
//! Maps a label id to its owning customer and to the keywords and reference
//! text that a read of the label is scored against.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CatalogError;

/// One label definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub id: String,
    pub customer_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub article_number: Option<String>,
    /// Words expected on the printed label
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Full expected text, for similarity reporting
    #[serde(default)]
    pub reference_text: Option<String>,
}

impl LabelEntry {
    /// An entry needs at least one keyword or a reference text to score against
    pub fn validate(&self) -> Result<(), CatalogError> {
        let has_keywords = self.keywords.iter().any(|k| !k.trim().is_empty());
        let has_text = self
            .reference_text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);

        if !has_keywords && !has_text {
            return Err(CatalogError::InvalidEntry {
                label: self.id.clone(),
                reason: "no keywords and no reference text".to_string(),
            });
        }
        Ok(())
    }
}

/// Source of reference data for labels
pub trait ReferenceCatalog: Send + Sync {
    /// Raw entry for a label id
    fn entry(&self, label_id: &str) -> Result<LabelEntry, CatalogError>;

    fn keywords(&self, label_id: &str) -> Result<Vec<String>, CatalogError> {
        Ok(self.entry(label_id)?.keywords)
    }

    fn reference_text(&self, label_id: &str) -> Result<Option<String>, CatalogError> {
        Ok(self.entry(label_id)?.reference_text)
    }

    /// Entry for arming a session: owned by `customer_id` and usable for scoring
    fn lookup(&self, customer_id: &str, label_id: &str) -> Result<LabelEntry, CatalogError> {
        let entry = self.entry(label_id)?;
        if entry.customer_id != customer_id {
            return Err(CatalogError::CustomerMismatch {
                label: label_id.to_string(),
                expected: entry.customer_id,
                actual: customer_id.to_string(),
            });
        }
        entry.validate()?;
        Ok(entry)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    labels: Vec<LabelEntry>,
}

/// Catalog kept in a JSON file: `{ "labels": [ ... ] }`
#[derive(Debug, Clone, Default)]
pub struct JsonCatalog {
    labels: HashMap<String, LabelEntry>,
}

impl JsonCatalog {
    /// Build from entries, rejecting duplicate ids
    pub fn from_entries(entries: Vec<LabelEntry>) -> Result<Self, CatalogError> {
        let mut labels = HashMap::with_capacity(entries.len());
        for entry in entries {
            if labels.contains_key(&entry.id) {
                return Err(CatalogError::InvalidEntry {
                    label: entry.id,
                    reason: "duplicate label id".to_string(),
                });
            }
            labels.insert(entry.id.clone(), entry);
        }
        Ok(Self { labels })
    }

    /// Load a catalog file
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        let file: CatalogFile = serde_json::from_str(&content)?;
        let catalog = Self::from_entries(file.labels)?;
        info!("Loaded {} labels from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Write the catalog, labels sorted by id
    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let file = CatalogFile {
            labels: self.entries().into_iter().cloned().collect(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// All entries sorted by id
    pub fn entries(&self) -> Vec<&LabelEntry> {
        let mut entries: Vec<_> = self.labels.values().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Labels belonging to one customer, sorted by id
    pub fn labels_for_customer(&self, customer_id: &str) -> Vec<&LabelEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.customer_id == customer_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl ReferenceCatalog for JsonCatalog {
    fn entry(&self, label_id: &str) -> Result<LabelEntry, CatalogError> {
        self.labels
            .get(label_id)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownLabel(label_id.to_string()))
    }
}
