//! Modern engine path
//!
//! The signed package is handed to the native installer once per root
//! slot. Paper Pro downgrades across the bootloader boundary also flash the
//! bootloader shipped with the currently installed release.

use std::path::Path;

use tempfile::TempDir;

use super::{EngineOrchestrator, InstallState, MODULE};
use crate::archive;
use crate::catalog::VersionCatalog;
use crate::config;
use crate::device::scripts::shell_quote;
use crate::device::DeviceIo;
use crate::download::{expected_file_name, ArtifactFetcher};
use crate::error::{Result, UpdateError};
use crate::hardware::HardwareClass;
use crate::prompt::Prompter;
use crate::utils::file_name_of;
use crate::log_info;

/// Refusal the installer prints for the slot holding the running system
const BENIGN_REFUSAL: &str = "installing over our current root";
const STOP_DAEMONS: &str = "systemctl stop swupdate memfaultd";

/// Root slot selection passed to the installer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwupdateTarget {
    Copy1,
    Copy2,
}

impl SwupdateTarget {
    pub const ALL: [SwupdateTarget; 2] = [SwupdateTarget::Copy1, SwupdateTarget::Copy2];

    pub fn selection(self) -> &'static str {
        match self {
            SwupdateTarget::Copy1 => "stable,copy1",
            SwupdateTarget::Copy2 => "stable,copy2",
        }
    }
}

/// Installer invocation for one slot
pub fn swupdate_command(package: &str, hardware: HardwareClass, target: SwupdateTarget) -> String {
    format!(
        "{} -v -i {} -k {} -H \"{}:1.0\" -e \"{}\"",
        config::device::SWUPDATE,
        shell_quote(package),
        config::device::SWUPDATE_KEY,
        hardware.swupdate_name(),
        target.selection()
    )
}

/// Bootloader files staged on the device. Keeps the local copies alive.
pub(super) struct StagedBootloader {
    _extracted: TempDir,
}

impl<'a, D: DeviceIo, P: Prompter> EngineOrchestrator<'a, D, P> {
    /// Confirm, then stage the bootloader of `current_version` on the device
    pub(super) async fn prepare_bootloader(
        &mut self,
        current_version: &str,
        catalog: &VersionCatalog,
        fetcher: &ArtifactFetcher,
        workdir: &Path,
        target_package: &Path,
    ) -> Result<StagedBootloader> {
        self.enter(InstallState::BootloaderPreStep);

        let question = format!(
            "Downgrading from {} across the 3.22 boundary also rewrites the bootloader. Continue?",
            current_version
        );
        if !self.prompter.confirm(&question) {
            return Err(UpdateError::Aborted(
                "bootloader downgrade was not confirmed".to_string(),
            ));
        }

        // A package downloaded next to the target file is reused
        let name = expected_file_name(catalog, self.hardware, current_version)?;
        let existing = [Some(workdir), target_package.parent()]
            .into_iter()
            .flatten()
            .map(|dir| dir.join(&name))
            .find(|path| path.is_file());
        let package = if let Some(existing) = existing {
            log_info!(MODULE, "Reusing {}", existing.display());
            existing
        } else {
            fetcher
                .download(catalog, self.hardware, current_version, workdir)
                .await?
                .path
        };

        let extracted = TempDir::new()?;
        let wanted = [config::device::BOOTLOADER_SCRIPT, config::device::BOOT_IMAGE];
        let found = archive::extract_files(&package, &wanted, extracted.path())?;
        if found.len() != wanted.len() {
            let mut names: Vec<String> = found.into_keys().collect();
            names.sort();
            return Err(UpdateError::BootloaderExtraction {
                package,
                expected: wanted.iter().map(|s| s.to_string()).collect(),
                found: names,
            });
        }

        for name in wanted {
            let remote = format!("{}/{}", config::device::STAGING_DIR, name);
            self.device.transfer_file(&found[name], &remote).await?;
        }
        self.device
            .run_checked(&format!(
                "chmod +x {}/{}",
                config::device::STAGING_DIR,
                config::device::BOOTLOADER_SCRIPT
            ))
            .await?;

        Ok(StagedBootloader {
            _extracted: extracted,
        })
    }

    pub(super) async fn install_modern(
        &mut self,
        artifact: &Path,
        bootloader: Option<StagedBootloader>,
    ) -> Result<Option<bool>> {
        self.enter(InstallState::Transferring);
        let package = if self.device.is_remote() {
            let remote = format!(
                "{}/{}.swu",
                config::device::STAGING_DIR,
                file_name_of(artifact)
            );
            self.device.transfer_file(artifact, &remote).await?;
            remote
        } else {
            artifact.to_string_lossy().into_owned()
        };

        self.enter(InstallState::Activating);
        log_info!(MODULE, "Running swupdate, this takes several minutes");
        let mut installed = 0;
        let mut refusal = None;
        for target in SwupdateTarget::ALL {
            let command = swupdate_command(&package, self.hardware, target);
            let output = self.device.run_command(&command).await?;
            if output.success() {
                log_info!(MODULE, "Installed to {}", target.selection());
                installed += 1;
            } else if output.stderr.contains(BENIGN_REFUSAL) {
                log_info!(MODULE, "{} holds the running system, skipped", target.selection());
                refusal = Some((command, output));
            } else {
                return Err(UpdateError::RemoteCommandFailed {
                    command,
                    code: output.code,
                    stderr: output.stderr.trim_end().to_string(),
                });
            }
        }

        if installed == 0 {
            let (command, output) = refusal.unwrap_or_default();
            return Err(UpdateError::RemoteCommandFailed {
                command,
                code: output.code,
                stderr: output.stderr.trim_end().to_string(),
            });
        }

        if let Some(staged) = bootloader {
            for mode in ["preinst", "postinst"] {
                log_info!(MODULE, "Running bootloader update ({})", mode);
                self.device
                    .run_checked(&format!(
                        "cd {} && ./{} {}",
                        config::device::STAGING_DIR,
                        config::device::BOOTLOADER_SCRIPT,
                        mode
                    ))
                    .await?;
            }
            drop(staged);
        }

        self.reboot_and_disable(STOP_DAEMONS).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{catalog, firmware};
    use super::super::{InstallSource, InstallState};
    use super::*;
    use crate::archive::build_newc;
    use crate::device::fake::FakeDevice;
    use crate::prompt::scripted::ScriptedPrompter;
    use reqwest::Client;

    const TARGET: &str = "remarkable-production-memfault-image-3.20.0.92-ferrari-public";
    const CURRENT: &str = "remarkable-production-memfault-image-3.22.0.64-ferrari-public";

    fn paper_pro(version: &str) -> FakeDevice {
        FakeDevice::remote().with_file(
            config::device::OS_RELEASE,
            &format!("IMG_VERSION=\"{}\"\n", version),
        )
    }

    fn paper_pro_catalog(dir: &TempDir) -> VersionCatalog {
        catalog(
            dir,
            serde_json::json!({
                "3.20.0.92": ["id320", "00"],
                "3.22.0.64": ["id322", "00"]
            }),
        )
    }

    #[test]
    fn test_swupdate_command_per_target() {
        assert_eq!(
            swupdate_command("/tmp/a.swu", HardwareClass::Rmpp, SwupdateTarget::Copy2),
            "/usr/bin/swupdate -v -i '/tmp/a.swu' -k /usr/share/swupdate/swupdate-payload-key-pub.pem -H \"ferrari:1.0\" -e \"stable,copy2\""
        );
        assert!(
            swupdate_command("/tmp/a.swu", HardwareClass::Rm2, SwupdateTarget::Copy1)
                .contains("-H \"reMarkable2:1.0\" -e \"stable,copy1\"")
        );
    }

    #[tokio::test]
    async fn test_modern_install_flow() {
        let dir = TempDir::new().unwrap();
        let catalog = paper_pro_catalog(&dir);
        let fetcher = ArtifactFetcher::new(Client::new());
        let file = firmware(&dir, TARGET);

        let mut device = paper_pro("3.20.0.92").respond("stable,copy1", 1, "ERROR: installing over our current root\n");
        let mut prompter = ScriptedPrompter::default();
        let report = EngineOrchestrator::new(&mut device, &mut prompter, HardwareClass::Rmpp)
            .install(InstallSource::File(file.clone()), &catalog, &fetcher, dir.path())
            .await
            .unwrap();

        assert_eq!(report.version, "3.20.0.92");
        assert!(!report.bootloader_updated);
        assert_eq!(report.daemon_disabled, Some(true));
        assert!(prompter.confirm_messages.is_empty());

        assert_eq!(
            device.transfers,
            vec![(file, format!("/tmp/{}.swu", TARGET))]
        );
        let copy1 = device.position("stable,copy1").unwrap();
        let copy2 = device.position("stable,copy2").unwrap();
        let reboot = device.position("reboot").unwrap();
        let stop = device.position(STOP_DAEMONS).unwrap();
        assert!(copy1 < copy2 && copy2 < reboot && reboot < stop);
    }

    #[tokio::test]
    async fn test_installer_failure_aborts() {
        let dir = TempDir::new().unwrap();
        let catalog = paper_pro_catalog(&dir);
        let fetcher = ArtifactFetcher::new(Client::new());
        let file = firmware(&dir, TARGET);

        let mut device = paper_pro("3.20.0.92").respond("stable,copy2", 1, "Signature verification failed\n");
        let mut prompter = ScriptedPrompter::default();
        let mut orchestrator =
            EngineOrchestrator::new(&mut device, &mut prompter, HardwareClass::Rmpp);
        let result = orchestrator
            .install(InstallSource::File(file), &catalog, &fetcher, dir.path())
            .await;

        match result {
            Err(UpdateError::RemoteCommandFailed { stderr, .. }) => {
                assert_eq!(stderr, "Signature verification failed")
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.version)),
        }
        assert!(matches!(
            orchestrator.state(),
            InstallState::Aborted(reason) if reason.contains("Signature verification failed")
        ));
        assert_eq!(device.reboots, 0);
    }

    #[tokio::test]
    async fn test_both_slots_refused_is_fatal() {
        let dir = TempDir::new().unwrap();
        let catalog = paper_pro_catalog(&dir);
        let fetcher = ArtifactFetcher::new(Client::new());
        let file = firmware(&dir, TARGET);

        let mut device = paper_pro("3.20.0.92").respond("swupdate -v", 1, BENIGN_REFUSAL);
        let mut prompter = ScriptedPrompter::default();
        let result = EngineOrchestrator::new(&mut device, &mut prompter, HardwareClass::Rmpp)
            .install(InstallSource::File(file), &catalog, &fetcher, dir.path())
            .await;
        assert!(matches!(result, Err(UpdateError::RemoteCommandFailed { .. })));
        assert_eq!(device.reboots, 0);
    }

    #[tokio::test]
    async fn test_bootloader_downgrade() {
        let dir = TempDir::new().unwrap();
        let catalog = paper_pro_catalog(&dir);
        let fetcher = ArtifactFetcher::new(Client::new());
        let file = firmware(&dir, TARGET);
        std::fs::write(
            dir.path().join(CURRENT),
            build_newc(&[
                ("sw-description", b"software = {};"),
                ("update-bootloader.sh", b"#!/bin/sh\n"),
                ("imx-boot", b"boot image"),
            ]),
        )
        .unwrap();

        let mut device = paper_pro("3.22.0.64");
        let mut prompter = ScriptedPrompter::default().with_confirmation(true);
        let report = EngineOrchestrator::new(&mut device, &mut prompter, HardwareClass::Rmpp)
            .install(InstallSource::File(file), &catalog, &fetcher, dir.path())
            .await
            .unwrap();

        assert!(report.bootloader_updated);
        assert!(report.states.contains(&InstallState::BootloaderPreStep));
        assert_eq!(prompter.confirm_messages.len(), 1);

        let package = format!("/tmp/{}.swu", TARGET);
        let staged: Vec<&str> = device.transfers.iter().map(|(_, r)| r.as_str()).collect();
        assert_eq!(
            staged,
            vec!["/tmp/update-bootloader.sh", "/tmp/imx-boot", package.as_str()]
        );

        let install = device.position("stable,copy2").unwrap();
        let preinst = device.position("./update-bootloader.sh preinst").unwrap();
        let postinst = device.position("./update-bootloader.sh postinst").unwrap();
        let reboot = device.position("reboot").unwrap();
        assert!(install < preinst && preinst < postinst && postinst < reboot);
    }

    #[tokio::test]
    async fn test_bootloader_downgrade_needs_confirmation() {
        let dir = TempDir::new().unwrap();
        let catalog = paper_pro_catalog(&dir);
        let fetcher = ArtifactFetcher::new(Client::new());
        let file = firmware(&dir, TARGET);

        let mut device = paper_pro("3.22.0.64");
        let mut prompter = ScriptedPrompter::default().with_confirmation(false);
        let result = EngineOrchestrator::new(&mut device, &mut prompter, HardwareClass::Rmpp)
            .install(InstallSource::File(file), &catalog, &fetcher, dir.path())
            .await;

        assert!(matches!(result, Err(UpdateError::Aborted(_))));
        assert!(!device.ran("swupdate"));
        assert!(device.transfers.is_empty());
    }

    #[tokio::test]
    async fn test_bootloader_package_missing_files() {
        let dir = TempDir::new().unwrap();
        let catalog = paper_pro_catalog(&dir);
        let fetcher = ArtifactFetcher::new(Client::new());
        let file = firmware(&dir, TARGET);
        std::fs::write(
            dir.path().join(CURRENT),
            build_newc(&[("imx-boot", b"boot image")]),
        )
        .unwrap();

        let mut device = paper_pro("3.22.0.64");
        let mut prompter = ScriptedPrompter::default().with_confirmation(true);
        let result = EngineOrchestrator::new(&mut device, &mut prompter, HardwareClass::Rmpp)
            .install(InstallSource::File(file), &catalog, &fetcher, dir.path())
            .await;

        match result {
            Err(UpdateError::BootloaderExtraction { found, .. }) => {
                assert_eq!(found, vec!["imx-boot".to_string()])
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.version)),
        }
        assert!(!device.ran("swupdate"));
    }
}
