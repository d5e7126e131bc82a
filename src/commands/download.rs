use std::path::PathBuf;

use crate::catalog::VersionCatalog;
use crate::download::ArtifactFetcher;
use crate::error::Result;
use crate::hardware::HardwareClass;
use crate::{log_debug, log_warn};
use crate::utils::{format_size, get_download_dir};

use super::{http_client, MODULE};

/// Resolve `token` and fetch the verified artifact into `out`
pub async fn download(token: &str, hardware: HardwareClass, out: Option<PathBuf>) -> Result<PathBuf> {
    let client = http_client()?;
    let catalog = VersionCatalog::open(&client).await?;
    let version = catalog.resolve(token, hardware, &client).await?;

    let dest = out.unwrap_or_else(get_download_dir);
    std::fs::create_dir_all(&dest)?;

    let fetcher = ArtifactFetcher::new(client);
    let artifact = match fetcher.download(&catalog, hardware, &version, &dest).await {
        Ok(artifact) => artifact,
        Err(e) => {
            if e.is_retryable() {
                log_warn!(MODULE, "Download of {} failed, running the command again may succeed", version);
            }
            return Err(e);
        }
    };

    for failed in &artifact.failed_sources {
        log_warn!(MODULE, "Source {} failed before a working one was found", failed);
    }
    log_debug!(
        MODULE,
        "Fetched from {} (sha256 {})",
        artifact.source_url,
        artifact.sha256
    );

    println!(
        "Successfully downloaded {} ({}) to {}",
        version,
        format_size(artifact.size),
        artifact.path.display()
    );
    Ok(artifact.path)
}
