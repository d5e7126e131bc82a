//! Session for codexctl running on the tablet itself

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use super::{AfterReboot, CommandOutput, DeviceIo};
use crate::config;
use crate::error::Result;
use crate::{log_debug, log_info};

const MODULE: &str = "device::local";

#[derive(Debug, Default)]
pub struct LocalDevice;

impl LocalDevice {
    /// `Some` when the machine identity says this is a tablet
    pub fn detect() -> Option<Self> {
        let machine = std::fs::read_to_string(config::device::MACHINE_PROBE).ok()?;
        if machine.contains("reMarkable") {
            log_debug!(MODULE, "Running on device: {}", machine.trim());
            Some(Self)
        } else {
            None
        }
    }

    fn shell(command: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(command)
            .env("PATH", config::device::LOCAL_PATH)
            .stdin(Stdio::null());
        cmd
    }
}

impl DeviceIo for LocalDevice {
    fn is_remote(&self) -> bool {
        false
    }

    fn address(&self) -> Option<&str> {
        None
    }

    async fn run_command(&mut self, command: &str) -> Result<CommandOutput> {
        let output = Self::shell(command).output().await?;
        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn transfer_file(&mut self, local: &Path, remote_path: &str) -> Result<()> {
        if local == Path::new(remote_path) {
            return Ok(());
        }
        log_info!(MODULE, "Copying {} to {}", local.display(), remote_path);
        tokio::fs::copy(local, remote_path).await?;
        Ok(())
    }

    async fn read_file(&mut self, path: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&mut self, path: &str, contents: &str) -> Result<()> {
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    async fn reboot_and_reconnect(&mut self) -> Result<AfterReboot> {
        log_info!(MODULE, "Rebooting device");
        Self::shell("reboot")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(AfterReboot::GoingDown)
    }
}
