//! Download module
//!
//! Fetches firmware artifacts with integrity checks. Versions up to the
//! last vendor release come from the vendor build server; later ones from
//! the provider templates in the manifest, tried in order.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};

use crate::catalog::{CatalogEntry, VersionCatalog};
use crate::config;
use crate::error::{Result, UpdateError};
use crate::hardware::HardwareClass;
use crate::utils::{bytes_to_mb, ProgressTracker};
use crate::version::Version;
use crate::{log_debug, log_error, log_info, log_warn};

const MODULE: &str = "download";

/// A verified firmware file on local disk
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
    /// URL the artifact was finally fetched from
    pub source_url: String,
    /// Sources that failed before the successful one
    pub failed_sources: Vec<String>,
}

/// One candidate location for an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub url: String,
    pub file_name: String,
}

/// Candidate URLs for a catalog entry, in the order they must be tried
pub fn build_sources(
    hardware: HardwareClass,
    entry: &CatalogEntry,
    providers: &[String],
) -> Result<Vec<Source>> {
    let version = Version::parse(&entry.version)?;
    let last_vendor = Version::parse(config::catalog::LAST_VENDOR_VERSION)?;

    if version <= last_vendor {
        let base = if version.major() >= 3 {
            match hardware {
                HardwareClass::Rm2 => format!("{}2", config::urls::VENDOR_BASE),
                _ => config::urls::VENDOR_BASE.to_string(),
            }
        } else {
            config::urls::VENDOR_BETA_BASE.to_string()
        };

        let file_name = vendor_file_name(hardware, &entry.version, &entry.source_id);
        return Ok(vec![Source {
            url: format!("{}/{}/{}", base, entry.version, file_name),
            file_name,
        }]);
    }

    let file_name = provider_file_name(hardware, &entry.version);
    Ok(providers
        .iter()
        .map(|template| Source {
            url: template.replace(config::urls::PROVIDER_PLACEHOLDER, &entry.source_id),
            file_name: file_name.clone(),
        })
        .collect())
}

/// `<version>_reMarkable[2]-<id>.signed`
pub fn vendor_file_name(hardware: HardwareClass, version: &str, source_id: &str) -> String {
    format!(
        "{}_{}-{}.signed",
        version,
        hardware.legacy_platform(),
        source_id
    )
}

/// `remarkable-production-memfault-image-<version>-<hardware>-public`
pub fn provider_file_name(hardware: HardwareClass, version: &str) -> String {
    format!(
        "remarkable-production-memfault-image-{}-{}-public",
        version,
        hardware.swupdate_name()
    )
}

/// File name a download of `version` would produce
pub fn expected_file_name(catalog: &VersionCatalog, hardware: HardwareClass, version: &str) -> Result<String> {
    let entry = catalog.entry(hardware, version)?;
    let sources = build_sources(hardware, entry, catalog.providers())?;
    sources
        .first()
        .map(|s| s.file_name.clone())
        .ok_or_else(|| UpdateError::NotFound {
            url: format!("no provider configured for {}", version),
        })
}

/// Streams artifacts to disk and verifies them
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    client: Client,
    min_size: u64,
}

impl ArtifactFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            min_size: config::download::MIN_ARTIFACT_SIZE,
        }
    }

    /// Override the minimum plausible artifact size
    #[cfg(test)]
    pub fn with_min_size(mut self, min_size: u64) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Download `version` for `hardware` into `dest_dir`
    pub async fn download(
        &self,
        catalog: &VersionCatalog,
        hardware: HardwareClass,
        version: &str,
        dest_dir: &Path,
    ) -> Result<Artifact> {
        let entry = catalog.entry(hardware, version)?;
        let sources = build_sources(hardware, entry, catalog.providers())?;
        self.download_from(&sources, &entry.checksum, dest_dir).await
    }

    /// Try each source in order until one yields a verified artifact.
    /// If all fail, the last failure is returned.
    pub async fn download_from(
        &self,
        sources: &[Source],
        checksum: &str,
        dest_dir: &Path,
    ) -> Result<Artifact> {
        if sources.is_empty() {
            return Err(UpdateError::NotFound {
                url: "no download source configured".to_string(),
            });
        }

        if !dest_dir.exists() {
            log_warn!(
                MODULE,
                "Download folder {} does not exist, creating it",
                dest_dir.display()
            );
            std::fs::create_dir_all(dest_dir)?;
        }

        let mut failed_sources = Vec::new();
        let mut last_error = None;

        for source in sources {
            match self.fetch_one(source, checksum, dest_dir).await {
                Ok((path, size, sha256)) => {
                    return Ok(Artifact {
                        path,
                        size,
                        sha256,
                        source_url: source.url.clone(),
                        failed_sources,
                    });
                }
                Err(e) => {
                    log_warn!(MODULE, "Download from {} failed: {}", source.url, e);
                    failed_sources.push(source.url.clone());
                    last_error = Some(e);
                }
            }
        }

        log_error!(MODULE, "All {} download source(s) failed", sources.len());
        Err(last_error.unwrap_or_else(|| UpdateError::NotFound {
            url: "no download source configured".to_string(),
        }))
    }

    async fn fetch_one(
        &self,
        source: &Source,
        checksum: &str,
        dest_dir: &Path,
    ) -> Result<(PathBuf, u64, String)> {
        log_info!(MODULE, "Download requested: {}", source.url);

        let response = self.client.get(&source.url).send().await.map_err(|e| {
            UpdateError::Network {
                url: source.url.clone(),
                reason: e.to_string(),
            }
        })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(UpdateError::NotFound {
                url: source.url.clone(),
            });
        }
        if !response.status().is_success() {
            return Err(UpdateError::Network {
                url: source.url.clone(),
                reason: format!("status {}", response.status()),
            });
        }

        let total_size = response.content_length().unwrap_or(0);
        if total_size > 0 && total_size < self.min_size {
            return Err(UpdateError::TooSmall {
                file: source.file_name.clone(),
                size: total_size,
            });
        }

        log_info!(
            MODULE,
            "Download size: {} bytes ({:.2} MB)",
            total_size,
            bytes_to_mb(total_size)
        );

        let output_path = dest_dir.join(&source.file_name);
        let temp_path = dest_dir.join(format!("{}.downloading", source.file_name));
        let mut temp_file = File::create(&temp_path)?;

        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut tracker = ProgressTracker::new(
            "Download",
            MODULE,
            total_size,
            config::logging::DOWNLOAD_LOG_INTERVAL_MB,
        );

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(temp_file);
                    let _ = std::fs::remove_file(&temp_path);
                    return Err(UpdateError::Network {
                        url: source.url.clone(),
                        reason: e.to_string(),
                    });
                }
            };

            if let Err(e) = temp_file.write_all(&chunk) {
                drop(temp_file);
                let _ = std::fs::remove_file(&temp_path);
                return Err(e.into());
            }
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            tracker.update(chunk.len() as u64);
        }

        drop(temp_file);
        tracker.finish();

        if downloaded < self.min_size {
            log_error!(
                MODULE,
                "File {} is too small to be a valid version file",
                source.file_name
            );
            let _ = std::fs::remove_file(&temp_path);
            return Err(UpdateError::TooSmall {
                file: source.file_name.clone(),
                size: downloaded,
            });
        }

        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(checksum) {
            log_error!(
                MODULE,
                "SHA256 verification FAILED! Expected: {}, Got: {}",
                checksum,
                actual
            );
            let _ = std::fs::remove_file(&temp_path);
            return Err(UpdateError::ChecksumMismatch {
                file: source.file_name.clone(),
                expected: checksum.to_string(),
                actual,
            });
        }
        log_info!(MODULE, "SHA256 verification PASSED");

        std::fs::rename(&temp_path, &output_path)?;
        log_info!(MODULE, "Artifact ready: {}", output_path.display());

        Ok((output_path, downloaded, actual))
    }
}

/// SHA-1 and SHA-256 of a file in one pass, plus its size
pub fn file_digests(path: &Path) -> Result<(Vec<u8>, Vec<u8>, u64)> {
    log_debug!(MODULE, "Calculating digests of: {}", path.display());

    let mut file = File::open(path)?;
    let mut sha1 = sha1::Sha1::new();
    let mut sha256 = Sha256::new();
    let mut buffer = vec![0u8; config::download::CHUNK_SIZE];
    let mut size = 0u64;

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        sha1.update(&buffer[..bytes_read]);
        sha256.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    Ok((sha1.finalize().to_vec(), sha256.finalize().to_vec(), size))
}
