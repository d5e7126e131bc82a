//! Session over SSH
//!
//! Drives the system OpenSSH client. One control-master connection is
//! authenticated up front and every later command multiplexes over it, so
//! credentials are only handled once per boot of the device.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::scripts::shell_quote;
use super::{is_reachable, wait_until_reachable, AfterReboot, CommandOutput, DeviceIo};
use crate::config;
use crate::error::{Result, UpdateError};
use crate::utils::ProgressTracker;
use crate::{log_debug, log_info, log_warn};

const MODULE: &str = "device::ssh";

/// ssh's own exit status for connection failures
const SSH_TRANSPORT_FAILURE: i32 = 255;
/// Exit status used by `read_file` for a missing file
const MISSING_FILE: i32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshAuth {
    /// `none` authentication (developer builds with an empty password)
    NoAuth,
    Password(String),
    KeyFile(PathBuf),
}

impl SshAuth {
    /// Interpret `--password`: a single space means no authentication and
    /// an existing file is a private key
    pub fn from_arg(arg: &str) -> Self {
        if arg == " " {
            SshAuth::NoAuth
        } else if Path::new(arg).is_file() {
            SshAuth::KeyFile(PathBuf::from(arg))
        } else {
            SshAuth::Password(arg.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshTarget {
    pub address: String,
    pub port: u16,
    pub auth: SshAuth,
}

impl SshTarget {
    fn destination(&self) -> String {
        format!("{}@{}", config::device::SSH_USER, self.address)
    }
}

pub struct SshConnection {
    target: SshTarget,
    control_path: PathBuf,
    /// Holds the control socket; removed on drop
    _control_dir: TempDir,
    master_open: bool,
}

impl SshConnection {
    /// Check reachability and open an authenticated master connection
    pub async fn connect(target: SshTarget) -> Result<Self> {
        if !is_reachable(&target.address, target.port).await {
            return Err(UpdateError::Unreachable(target.address.clone()));
        }

        let control_dir = TempDir::new()?;
        let mut connection = Self {
            control_path: control_dir.path().join("control"),
            _control_dir: control_dir,
            target,
            master_open: false,
        };
        connection.open_master().await?;
        Ok(connection)
    }

    async fn open_master(&mut self) -> Result<()> {
        log_info!(
            MODULE,
            "Connecting to {}:{}",
            self.target.address,
            self.target.port
        );

        let mut cmd = match &self.target.auth {
            SshAuth::Password(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh").env("SSHPASS", password);
                cmd
            }
            _ => Command::new("ssh"),
        };
        cmd.args(self.common_args());
        match &self.target.auth {
            SshAuth::NoAuth => {
                cmd.args([
                    "-o",
                    "BatchMode=yes",
                    "-o",
                    "PubkeyAuthentication=no",
                    "-o",
                    "PasswordAuthentication=no",
                ]);
            }
            SshAuth::KeyFile(path) => {
                cmd.arg("-i").arg(path).args(["-o", "BatchMode=yes"]);
            }
            SshAuth::Password(_) => {
                cmd.args(["-o", "PubkeyAuthentication=no"]);
            }
        }
        cmd.args(["-M", "-f", "-N"])
            .arg(self.target.destination())
            .stdin(Stdio::null());

        let output = cmd.output().await.map_err(|e| {
            UpdateError::Transport(format!("Failed to start ssh: {}", e))
        })?;
        if !output.status.success() {
            return Err(UpdateError::Transport(format!(
                "Could not connect to {}: {}",
                self.target.address,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        self.master_open = true;
        log_info!(MODULE, "Connected to {}", self.target.address);
        Ok(())
    }

    fn common_args(&self) -> Vec<String> {
        vec![
            "-p".to_string(),
            self.target.port.to_string(),
            "-S".to_string(),
            self.control_path.to_string_lossy().into_owned(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ]
    }

    /// `ssh` invocation that runs `command` over the master connection
    fn remote(&self, command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.common_args())
            .arg(self.target.destination())
            .arg("--")
            .arg(command);
        cmd
    }

    async fn exit_master(&mut self) {
        if !self.master_open {
            return;
        }
        let _ = Command::new("ssh")
            .args(self.common_args())
            .args(["-O", "exit"])
            .arg(self.target.destination())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        self.master_open = false;
    }

    /// Whether the control master still answers `-O check`
    async fn master_alive(&self) -> bool {
        if !self.master_open {
            return false;
        }
        Command::new("ssh")
            .args(self.common_args())
            .args(["-O", "check"])
            .arg(self.target.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    pub async fn close(mut self) {
        log_debug!(MODULE, "Closing connection to {}", self.target.address);
        self.exit_master().await;
    }

    /// Stream `reader` into `cat > path` on the device
    async fn upload<R>(&mut self, mut reader: R, total: u64, remote_path: &str) -> Result<()>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let command = format!("cat > {}", shell_quote(remote_path));
        let mut child = self
            .remote(&command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| UpdateError::Transport("ssh stdin unavailable".to_string()))?;

        let mut tracker = ProgressTracker::new(
            "Transfer",
            MODULE,
            total,
            config::logging::DOWNLOAD_LOG_INTERVAL_MB,
        );
        let mut buffer = vec![0u8; config::download::CHUNK_SIZE * 8];
        let copy_result: std::io::Result<()> = async {
            loop {
                let n = reader.read(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                stdin.write_all(&buffer[..n]).await?;
                tracker.update(n as u64);
            }
            stdin.shutdown().await
        }
        .await;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if let Err(e) = copy_result {
            return Err(UpdateError::Transport(format!(
                "Transfer to {} failed: {}",
                remote_path, e
            )));
        }
        if !output.status.success() {
            return Err(UpdateError::RemoteCommandFailed {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            });
        }
        tracker.finish();
        Ok(())
    }
}

/// Exit status 255 is ambiguous: ssh uses it for its own failures, and a
/// remote command may exit with it too. Only a dead master means the
/// connection is gone.
fn classify_output(output: CommandOutput, master_alive: bool, address: &str) -> Result<CommandOutput> {
    if output.code == SSH_TRANSPORT_FAILURE && !master_alive {
        return Err(UpdateError::Transport(format!(
            "Connection to {} lost: {}",
            address,
            output.stderr.trim()
        )));
    }
    Ok(output)
}

impl DeviceIo for SshConnection {
    fn is_remote(&self) -> bool {
        true
    }

    fn address(&self) -> Option<&str> {
        Some(&self.target.address)
    }

    async fn run_command(&mut self, command: &str) -> Result<CommandOutput> {
        let output = self
            .remote(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| UpdateError::Transport(format!("Failed to run ssh: {}", e)))?;

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        let master_alive = if result.code == SSH_TRANSPORT_FAILURE {
            self.master_alive().await
        } else {
            true
        };
        classify_output(result, master_alive, &self.target.address)
    }

    async fn transfer_file(&mut self, local: &Path, remote_path: &str) -> Result<()> {
        log_info!(
            MODULE,
            "Uploading {} to {}",
            local.display(),
            remote_path
        );
        let file = tokio::fs::File::open(local).await?;
        let total = file.metadata().await?.len();
        self.upload(file, total, remote_path).await
    }

    async fn read_file(&mut self, path: &str) -> Result<Option<String>> {
        let quoted = shell_quote(path);
        let command = format!("[ -e {q} ] || exit {code}; cat {q}", q = quoted, code = MISSING_FILE);
        let output = self.run_command(&command).await?;
        match output.code {
            0 => Ok(Some(output.stdout)),
            MISSING_FILE => Ok(None),
            code => Err(UpdateError::RemoteCommandFailed {
                command,
                code,
                stderr: output.stderr.trim_end().to_string(),
            }),
        }
    }

    async fn write_file(&mut self, path: &str, contents: &str) -> Result<()> {
        self.upload(contents.as_bytes(), contents.len() as u64, path)
            .await
    }

    async fn reboot_and_reconnect(&mut self) -> Result<AfterReboot> {
        log_info!(MODULE, "Rebooting {}", self.target.address);
        let output = self
            .run_command("nohup sh -c 'sleep 1 && reboot' </dev/null >/dev/null 2>&1 &")
            .await;
        if let Err(e) = output {
            log_warn!(MODULE, "Reboot request ended abnormally: {}", e);
        }
        self.exit_master().await;

        wait_until_reachable(
            &self.target.address,
            self.target.port,
            config::device::REBOOT_GRACE,
            config::device::POLL_INTERVAL,
        )
        .await;

        self.open_master().await?;
        Ok(AfterReboot::Reconnected)
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        if self.master_open {
            let _ = std::process::Command::new("ssh")
                .args(self.common_args())
                .args(["-O", "exit"])
                .arg(self.target.destination())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}
