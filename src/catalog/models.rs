//! Catalog data models
//!
//! Wire shape of version-ids.json and the typed entries built from it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::hardware::HardwareClass;

/// Raw manifest as stored on disk and served by the canonical URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "last-updated")]
    pub last_updated: i64,
    #[serde(
        rename = "external-provider-url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub external_provider_url: Option<String>,
    #[serde(
        rename = "external-provider-urls",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub external_provider_urls: Vec<String>,
    #[serde(default)]
    pub remarkable1: IndexMap<String, (String, String)>,
    #[serde(default)]
    pub remarkable2: IndexMap<String, (String, String)>,
    #[serde(default)]
    pub remarkablepp: IndexMap<String, (String, String)>,
    #[serde(default)]
    pub remarkableppm: IndexMap<String, (String, String)>,
}

impl Manifest {
    pub fn table(&self, hardware: HardwareClass) -> &IndexMap<String, (String, String)> {
        match hardware {
            HardwareClass::Rm1 => &self.remarkable1,
            HardwareClass::Rm2 => &self.remarkable2,
            HardwareClass::Rmpp => &self.remarkablepp,
            HardwareClass::Rmppm => &self.remarkableppm,
        }
    }

    /// Provider templates in the order they should be tried
    pub fn providers(&self) -> Vec<String> {
        let mut providers = self.external_provider_urls.clone();
        if let Some(ref single) = self.external_provider_url {
            if !providers.contains(single) {
                providers.push(single.clone());
            }
        }
        providers
    }
}

/// Artifact identity for one (hardware, version) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub version: String,
    /// Opaque id substituted into URL templates
    pub source_id: String,
    /// Hex SHA-256 of the whole artifact
    pub checksum: String,
}
