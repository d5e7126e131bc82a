//! Install orchestration
//!
//! One install is an explicit walk through [`InstallState`]. The engine the
//! target version uses picks the path: the legacy engine is pointed at a
//! local update-check responder, the modern engine gets the signed package
//! directly. Any failure lands in `Aborted` with the reason.

mod legacy;
mod modern;

use std::path::{Path, PathBuf};

use crate::catalog::VersionCatalog;
use crate::compat::{self, engine_for, EngineKind};
use crate::device::{AfterReboot, DeviceIo, DeviceStatus};
use crate::download::ArtifactFetcher;
use crate::error::{Result, UpdateError};
use crate::hardware::HardwareClass;
use crate::prompt::Prompter;
use crate::utils::file_name_of;
use crate::version::{extract_from_filename, is_full_version};
use crate::{config, log_error, log_info, log_warn};

const MODULE: &str = "engine";

/// What the operator asked to install
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// A catalog token: `latest`, `toltec` or a literal version
    Version(String),
    /// A firmware file already on disk
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    Resolving,
    Fetching,
    CompatibilityChecked,
    BootloaderPreStep,
    Transferring,
    Activating,
    Rebooting,
    Reconnected,
    Done,
    Aborted(String),
}

#[derive(Debug, Clone)]
pub struct InstallReport {
    pub version: String,
    pub previous_version: String,
    pub engine: EngineKind,
    pub artifact: PathBuf,
    pub bootloader_updated: bool,
    /// `None` when this process runs on the device and went down with it
    pub daemon_disabled: Option<bool>,
    pub states: Vec<InstallState>,
}

/// Drives one install against one device session
pub struct EngineOrchestrator<'a, D, P> {
    device: &'a mut D,
    prompter: &'a mut P,
    hardware: HardwareClass,
    responder_host: Option<String>,
    responder_port: u16,
    state: InstallState,
    history: Vec<InstallState>,
}

impl<'a, D: DeviceIo, P: Prompter> EngineOrchestrator<'a, D, P> {
    pub fn new(device: &'a mut D, prompter: &'a mut P, hardware: HardwareClass) -> Self {
        Self {
            device,
            prompter,
            hardware,
            responder_host: None,
            responder_port: config::device::RESPONDER_PORT,
            state: InstallState::Resolving,
            history: Vec::new(),
        }
    }

    /// Address advertised to a legacy-engine device instead of asking
    pub fn with_responder_host(mut self, host: Option<String>) -> Self {
        self.responder_host = host;
        self
    }

    #[cfg(test)]
    pub fn with_responder_port(mut self, port: u16) -> Self {
        self.responder_port = port;
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> &InstallState {
        &self.state
    }

    #[cfg(test)]
    pub fn history(&self) -> &[InstallState] {
        &self.history
    }

    fn enter(&mut self, state: InstallState) {
        log_info!(MODULE, "Install state: {:?}", state);
        self.history.push(state.clone());
        self.state = state;
    }

    pub async fn install(
        &mut self,
        source: InstallSource,
        catalog: &VersionCatalog,
        fetcher: &ArtifactFetcher,
        workdir: &Path,
    ) -> Result<InstallReport> {
        match self.run(source, catalog, fetcher, workdir).await {
            Ok(report) => Ok(report),
            Err(e) => {
                log_error!(MODULE, "Install aborted: {}", e);
                self.enter(InstallState::Aborted(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        source: InstallSource,
        catalog: &VersionCatalog,
        fetcher: &ArtifactFetcher,
        workdir: &Path,
    ) -> Result<InstallReport> {
        self.enter(InstallState::Resolving);
        let status = DeviceStatus::read(&mut *self.device, self.hardware).await?;
        log_info!(MODULE, "Device is running {}", status.version);

        let (version, local_file) = match source {
            InstallSource::Version(token) => {
                let version = catalog
                    .resolve(&token, self.hardware, fetcher.client())
                    .await?;
                (version, None)
            }
            InstallSource::File(path) => (self.version_of_file(&path)?, Some(path)),
        };
        log_info!(MODULE, "Installing {} on {}", version, self.hardware);

        // Vetoes run before any download
        compat::assert_engine_available(self.hardware, &version)?;
        compat::assert_compatible(&status.version, &version)?;
        let engine = engine_for(&version)?;

        let artifact = match local_file {
            Some(path) => path,
            None => {
                self.enter(InstallState::Fetching);
                fetcher
                    .download(catalog, self.hardware, &version, workdir)
                    .await?
                    .path
            }
        };

        self.enter(InstallState::CompatibilityChecked);
        let crosses_boundary = engine == EngineKind::Modern
            && self.hardware.has_bootloader_boundary()
            && compat::is_bootloader_boundary_downgrade(&status.version, &version);

        let (daemon_disabled, bootloader_updated) = match engine {
            EngineKind::Legacy => (self.install_legacy(&artifact, &version).await?, false),
            EngineKind::Modern => {
                let bootloader = if crosses_boundary {
                    Some(
                        self.prepare_bootloader(&status.version, catalog, fetcher, workdir, &artifact)
                            .await?,
                    )
                } else {
                    None
                };
                let updated = bootloader.is_some();
                (self.install_modern(&artifact, bootloader).await?, updated)
            }
        };

        self.enter(InstallState::Done);
        Ok(InstallReport {
            version,
            previous_version: status.version,
            engine,
            artifact,
            bootloader_updated,
            daemon_disabled,
            states: self.history.clone(),
        })
    }

    /// Version from the file name, else asked once
    fn version_of_file(&mut self, path: &Path) -> Result<String> {
        let name = file_name_of(path);
        if let Some(version) = extract_from_filename(&name) {
            return Ok(version);
        }

        log_warn!(MODULE, "No version number in {}", name);
        let entered = self
            .prompter
            .ask_version(&name)
            .ok_or_else(|| UpdateError::Aborted("no version given".to_string()))?;
        let entered = entered.trim();
        if !is_full_version(entered) {
            return Err(UpdateError::InvalidVersionFormat(entered.to_string()));
        }
        Ok(entered.to_string())
    }

    /// Reboot, reconnect and stop the update daemon. A failed stop is
    /// reported in the result, not raised.
    async fn reboot_and_disable(&mut self, disable_command: &str) -> Result<Option<bool>> {
        self.enter(InstallState::Rebooting);
        match self.device.reboot_and_reconnect().await? {
            AfterReboot::GoingDown => {
                log_info!(MODULE, "Update complete and device rebooting");
                Ok(None)
            }
            AfterReboot::Reconnected => {
                self.enter(InstallState::Reconnected);
                match self.device.run_checked(disable_command).await {
                    Ok(_) => {
                        log_info!(MODULE, "Update service stopped until the next restart");
                        Ok(Some(true))
                    }
                    Err(e) => {
                        log_warn!(MODULE, "Could not stop the update service: {}", e);
                        Ok(Some(false))
                    }
                }
            }
        }
    }
}
