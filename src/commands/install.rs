use std::path::Path;

use tempfile::TempDir;

use crate::catalog::VersionCatalog;
use crate::device::probe_hardware;
use crate::download::ArtifactFetcher;
use crate::engine::{EngineOrchestrator, InstallReport, InstallSource};
use crate::error::Result;
use crate::log_debug;
use crate::prompt::Prompter;

use super::{http_client, open_session, ConnectOptions, MODULE};

/// Install a version token or a firmware file on the connected device
pub async fn install<P: Prompter>(
    target: &str,
    host: Option<String>,
    options: &ConnectOptions,
    prompter: &mut P,
) -> Result<()> {
    let client = http_client()?;
    let catalog = VersionCatalog::open(&client).await?;
    let fetcher = ArtifactFetcher::new(client);
    let workdir = TempDir::new()?;
    log_debug!(MODULE, "Working directory {}", workdir.path().display());

    let mut session = open_session(options, prompter).await?;
    let result = async {
        let hardware = probe_hardware(&mut session).await?;
        let mut orchestrator = EngineOrchestrator::new(&mut session, &mut *prompter, hardware)
            .with_responder_host(host);
        orchestrator
            .install(source_of(target), &catalog, &fetcher, workdir.path())
            .await
    }
    .await;
    session.close().await;

    let report = result?;
    log_debug!(
        MODULE,
        "{:?} engine installed {} via {:?}",
        report.engine,
        report.artifact.display(),
        report.states
    );
    println!("{}", render(&report));
    Ok(())
}

/// An existing file is installed as-is, anything else is a version token
fn source_of(target: &str) -> InstallSource {
    let path = Path::new(target);
    if path.is_file() {
        InstallSource::File(path.to_path_buf())
    } else {
        InstallSource::Version(target.to_string())
    }
}

fn render(report: &InstallReport) -> String {
    let mut out = format!(
        "Update complete: {} -> {}",
        report.previous_version, report.version
    );
    if report.bootloader_updated {
        out.push_str("\nBootloader files were updated for the downgrade");
    }
    match report.daemon_disabled {
        Some(true) => out.push_str("\nUpdate service stopped until the next restart"),
        Some(false) => out.push_str(
            "\nCould not stop the update service, the device may update itself again",
        ),
        None => out.push_str("\nDevice is rebooting"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::EngineKind;
    use std::path::PathBuf;

    #[test]
    fn test_source_of() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("firmware.swu");
        std::fs::write(&file, b"x").unwrap();

        assert_eq!(
            source_of(file.to_str().unwrap()),
            InstallSource::File(file.clone())
        );
        assert_eq!(
            source_of("latest"),
            InstallSource::Version("latest".to_string())
        );
        assert_eq!(
            source_of(dir.path().to_str().unwrap()),
            InstallSource::Version(dir.path().to_string_lossy().to_string())
        );
    }

    #[test]
    fn test_render_report() {
        let report = InstallReport {
            version: "3.11.2.5".to_string(),
            previous_version: "3.10.2.2063".to_string(),
            engine: EngineKind::Modern,
            artifact: PathBuf::from("/tmp/x.swu"),
            bootloader_updated: false,
            daemon_disabled: Some(false),
            states: Vec::new(),
        };
        let out = render(&report);
        assert!(out.starts_with("Update complete: 3.10.2.2063 -> 3.11.2.5"));
        assert!(out.contains("may update itself again"));
    }
}
