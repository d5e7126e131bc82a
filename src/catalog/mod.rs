//! Version catalog
//!
//! Loads version-ids.json, refreshes it when stale and resolves version
//! tokens (`latest`, `toltec` or a literal version) per hardware class.

mod models;

pub use models::{CatalogEntry, Manifest};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeZone, Utc};
use indexmap::IndexMap;
use reqwest::Client;

use crate::config;
use crate::error::{Result, UpdateError};
use crate::hardware::HardwareClass;
use crate::version::max_version;
use crate::{log_debug, log_error, log_info};

const MODULE: &str = "catalog";

/// Parsed manifest for every hardware class
#[derive(Debug, Clone)]
pub struct VersionCatalog {
    path: PathBuf,
    last_updated: DateTime<Utc>,
    providers: Vec<String>,
    tables: HashMap<HardwareClass, IndexMap<String, CatalogEntry>>,
}

impl VersionCatalog {
    /// Parse a cached manifest. Anything unparsable is fatal; the cache is
    /// never repaired behind the user's back.
    pub fn load(path: &Path) -> Result<Self> {
        log_debug!(MODULE, "Loading version manifest from {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let manifest: Manifest =
            serde_json::from_str(&content).map_err(|e| UpdateError::CorruptCache {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Self::from_manifest(path, manifest)
    }

    fn from_manifest(path: &Path, manifest: Manifest) -> Result<Self> {
        let last_updated = Utc
            .timestamp_opt(manifest.last_updated, 0)
            .single()
            .ok_or_else(|| UpdateError::CorruptCache {
                path: path.to_path_buf(),
                reason: format!("invalid last-updated {}", manifest.last_updated),
            })?;

        let mut tables = HashMap::new();
        for hardware in HardwareClass::ALL {
            let entries = manifest
                .table(hardware)
                .iter()
                .map(|(version, (source_id, checksum))| {
                    (
                        version.clone(),
                        CatalogEntry {
                            version: version.clone(),
                            source_id: source_id.clone(),
                            checksum: checksum.to_lowercase(),
                        },
                    )
                })
                .collect::<IndexMap<_, _>>();
            log_debug!(MODULE, "{}: {} version(s)", hardware.catalog_key(), entries.len());
            tables.insert(hardware, entries);
        }

        let providers = manifest.providers();
        log_debug!(
            MODULE,
            "Manifest last updated {}, {} provider(s)",
            last_updated,
            providers.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            last_updated,
            providers,
            tables,
        })
    }

    /// Locate, download if missing, load and refresh the user's catalog
    pub async fn open(client: &Client) -> Result<Self> {
        let path = default_cache_path()?;
        if !path.exists() {
            log_info!(MODULE, "No cached version manifest, downloading");
            fetch_manifest(client, config::urls::VERSION_MANIFEST, &path).await?;
        }

        Self::load(&path)?
            .refresh_if_stale(Utc::now(), client, config::urls::VERSION_MANIFEST)
            .await
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.last_updated > Duration::seconds(config::catalog::RETENTION_SECS)
    }

    /// Re-download the manifest once the retention window has passed.
    /// A failed refresh is fatal.
    pub async fn refresh_if_stale(
        self,
        now: DateTime<Utc>,
        client: &Client,
        manifest_url: &str,
    ) -> Result<Self> {
        if !self.is_stale(now) {
            return Ok(self);
        }

        log_info!(
            MODULE,
            "Version manifest is stale (last updated {}), refreshing",
            self.last_updated
        );
        fetch_manifest(client, manifest_url, &self.path).await?;
        Self::load(&self.path)
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Provider URL templates, in fallback order
    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    /// Versions for a hardware class in manifest order
    pub fn versions(&self, hardware: HardwareClass) -> impl Iterator<Item = &str> {
        self.tables
            .get(&hardware)
            .into_iter()
            .flat_map(|table| table.keys().map(String::as_str))
    }

    pub fn entry(&self, hardware: HardwareClass, version: &str) -> Result<&CatalogEntry> {
        self.tables
            .get(&hardware)
            .and_then(|table| table.get(version))
            .ok_or_else(|| UpdateError::UnknownVersion {
                version: version.to_string(),
                hardware,
            })
    }

    /// Numerically highest version for a hardware class
    pub fn latest(&self, hardware: HardwareClass) -> Option<&str> {
        max_version(self.versions(hardware))
    }

    /// Resolve a version token against the catalog
    pub async fn resolve(
        &self,
        token: &str,
        hardware: HardwareClass,
        client: &Client,
    ) -> Result<String> {
        self.resolve_with_toltec(token, hardware, client, config::urls::TOLTEC_COMPATIBILITY)
            .await
    }

    async fn resolve_with_toltec(
        &self,
        token: &str,
        hardware: HardwareClass,
        client: &Client,
        toltec_url: &str,
    ) -> Result<String> {
        let resolved = match token {
            "latest" => self
                .latest(hardware)
                .map(str::to_string)
                .ok_or_else(|| UpdateError::UnknownVersion {
                    version: token.to_string(),
                    hardware,
                })?,
            "toltec" => fetch_toltec_version(client, toltec_url, hardware).await?,
            literal => self.entry(hardware, literal)?.version.clone(),
        };

        log_debug!(MODULE, "Resolved {:?} to {} for {}", token, resolved, hardware);
        Ok(resolved)
    }
}

/// `./data/version-ids.json` in a checkout, else the per-user config dir
pub fn default_cache_path() -> Result<PathBuf> {
    let local = Path::new(config::catalog::LOCAL_DATA_DIR).join(config::catalog::CACHE_FILE);
    if local.exists() {
        log_debug!(MODULE, "Found version-ids at {}", local.display());
        return Ok(local);
    }

    let folder = crate::utils::get_config_dir(config::app::NAME);
    std::fs::create_dir_all(&folder)?;
    Ok(folder.join(config::catalog::CACHE_FILE))
}

/// Download the manifest and overwrite the cache file
pub async fn fetch_manifest(client: &Client, url: &str, path: &Path) -> Result<()> {
    log_info!(MODULE, "Downloading version manifest from {}", url);

    let response = client.get(url).send().await.map_err(|e| {
        log_error!(MODULE, "Failed to fetch version manifest: {}", e);
        UpdateError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        }
    })?;

    if !response.status().is_success() {
        return Err(UpdateError::Network {
            url: url.to_string(),
            reason: format!("status {}", response.status()),
        });
    }

    let contents: serde_json::Value = response.json().await.map_err(|e| UpdateError::Network {
        url: url.to_string(),
        reason: format!("invalid manifest: {}", e),
    })?;

    // Validate before overwriting a good cache with garbage
    serde_json::from_value::<Manifest>(contents.clone()).map_err(|e| UpdateError::Network {
        url: url.to_string(),
        reason: format!("invalid manifest: {}", e),
    })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut serialized = serde_json::to_string_pretty(&contents)?;
    serialized.push('\n');
    std::fs::write(path, serialized)?;

    log_info!(MODULE, "Version manifest saved to {}", path.display());
    Ok(())
}

/// Highest toltec-compatible version for a hardware class
pub async fn fetch_toltec_version(
    client: &Client,
    url: &str,
    hardware: HardwareClass,
) -> Result<String> {
    let key = hardware
        .toltec_key()
        .ok_or(UpdateError::ToltecUnsupported(hardware))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| UpdateError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(UpdateError::Network {
            url: url.to_string(),
            reason: format!("failed to get toltec compatibility table: {}", response.status()),
        });
    }

    let table = response.text().await?;
    max_toltec_version(&table, key).ok_or_else(|| UpdateError::UnknownVersion {
        version: "toltec".to_string(),
        hardware,
    })
}

/// Parse `rm1=<version>` lines and keep the highest for `key`
pub fn max_toltec_version(table: &str, key: &str) -> Option<String> {
    let prefix = format!("{}=", key);
    max_version(
        table
            .lines()
            .filter_map(|line| line.trim().strip_prefix(prefix.as_str())),
    )
    .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use tempfile::TempDir;

    const SHA_A: &str = "a3b4c2d1e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";

    fn manifest_json(last_updated: i64) -> String {
        serde_json::json!({
            "last-updated": last_updated,
            "external-provider-url": "https://provider.example/REPLACE_ID",
            "remarkable1": { "2.15.1.1189": ["id1", SHA_A] },
            "remarkable2": {
                "3.9.5.2026": ["id2", SHA_A],
                "3.11.2.5": ["id3", SHA_A],
                "2.99.9.9999": ["id4", SHA_A]
            },
            "remarkablepp": { "3.20.0.92": ["id5", SHA_A] }
        })
        .to_string()
    }

    fn write_manifest(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("version-ids.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_load_valid_manifest() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(&dir, &manifest_json(Utc::now().timestamp()));
        let catalog = VersionCatalog::load(&path).unwrap();

        assert_eq!(catalog.versions(HardwareClass::Rm2).count(), 3);
        assert_eq!(catalog.versions(HardwareClass::Rmppm).count(), 0);
        assert_eq!(catalog.providers(), ["https://provider.example/REPLACE_ID"]);
        let entry = catalog.entry(HardwareClass::Rm1, "2.15.1.1189").unwrap();
        assert_eq!(entry.source_id, "id1");
        assert_eq!(entry.checksum, SHA_A);
    }

    #[test]
    fn test_load_corrupt_manifest_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(&dir, "{ this is not json");
        assert!(matches!(
            VersionCatalog::load(&path),
            Err(UpdateError::CorruptCache { .. })
        ));

        let path = write_manifest(&dir, "[1, 2, 3]");
        assert!(matches!(
            VersionCatalog::load(&path),
            Err(UpdateError::CorruptCache { .. })
        ));
    }

    #[test]
    fn test_latest_is_numeric() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(&dir, &manifest_json(Utc::now().timestamp()));
        let catalog = VersionCatalog::load(&path).unwrap();
        assert_eq!(catalog.latest(HardwareClass::Rm2), Some("3.11.2.5"));
        assert_eq!(catalog.latest(HardwareClass::Rmppm), None);
    }

    #[test]
    fn test_is_stale() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let fresh = write_manifest(&dir, &manifest_json(now.timestamp() - 60));
        assert!(!VersionCatalog::load(&fresh).unwrap().is_stale(now));

        let old = now.timestamp() - config::catalog::RETENTION_SECS - 1;
        let stale = write_manifest(&dir, &manifest_json(old));
        assert!(VersionCatalog::load(&stale).unwrap().is_stale(now));
    }

    #[tokio::test]
    async fn test_resolve_tokens() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(&dir, &manifest_json(Utc::now().timestamp()));
        let catalog = VersionCatalog::load(&path).unwrap();
        let client = Client::new();

        assert_eq!(
            catalog.resolve("latest", HardwareClass::Rm2, &client).await.unwrap(),
            "3.11.2.5"
        );
        assert_eq!(
            catalog.resolve("3.9.5.2026", HardwareClass::Rm2, &client).await.unwrap(),
            "3.9.5.2026"
        );
        assert!(matches!(
            catalog.resolve("3.9.5.2026", HardwareClass::Rm1, &client).await,
            Err(UpdateError::UnknownVersion { .. })
        ));
        assert!(matches!(
            catalog.resolve("toltec", HardwareClass::Rmpp, &client).await,
            Err(UpdateError::ToltecUnsupported(HardwareClass::Rmpp))
        ));
    }

    #[tokio::test]
    async fn test_resolve_toltec_from_table() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(&dir, &manifest_json(Utc::now().timestamp()));
        let catalog = VersionCatalog::load(&path).unwrap();

        let base = serve(Router::new().route(
            "/Compatibility",
            get(|| async { "rm1=2.15.1.1189\nrm2=3.3.2.1666\nrm2=3.11.2.5\nrm2=3.9.5.2026\n" }),
        ))
        .await;
        let url = format!("{}/Compatibility", base);

        let resolved = catalog
            .resolve_with_toltec("toltec", HardwareClass::Rm2, &Client::new(), &url)
            .await
            .unwrap();
        assert_eq!(resolved, "3.11.2.5");
    }

    #[test]
    fn test_max_toltec_version() {
        let table = "rm1=2.15.1.1189\nrm2=3.3.2.1666\nrm1=3.0.4.1305\n";
        assert_eq!(max_toltec_version(table, "rm1"), Some("3.0.4.1305".to_string()));
        assert_eq!(max_toltec_version(table, "rm2"), Some("3.3.2.1666".to_string()));
        assert_eq!(max_toltec_version(table, "rm3"), None);
    }

    #[tokio::test]
    async fn test_refresh_if_stale_overwrites_cache() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let stale_ts = now.timestamp() - config::catalog::RETENTION_SECS - 10;
        let path = write_manifest(&dir, &manifest_json(stale_ts));

        let fresh = manifest_json(now.timestamp());
        let base = serve(Router::new().route(
            "/version-ids.json",
            get(move || {
                let body = fresh.clone();
                async move { ([("content-type", "application/json")], body) }
            }),
        ))
        .await;

        let catalog = VersionCatalog::load(&path)
            .unwrap()
            .refresh_if_stale(now, &Client::new(), &format!("{}/version-ids.json", base))
            .await
            .unwrap();

        assert!(!catalog.is_stale(now));
        assert_eq!(catalog.last_updated().timestamp(), now.timestamp());
    }

    #[tokio::test]
    async fn test_refresh_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let stale_ts = now.timestamp() - config::catalog::RETENTION_SECS - 10;
        let path = write_manifest(&dir, &manifest_json(stale_ts));

        let base = serve(Router::new()).await;
        let result = VersionCatalog::load(&path)
            .unwrap()
            .refresh_if_stale(now, &Client::new(), &format!("{}/missing.json", base))
            .await;

        assert!(matches!(result, Err(UpdateError::Network { .. })));
    }
}
