//! Device sessions
//!
//! A session is either the tablet this process runs on or a tablet reached
//! over SSH. Both expose the same capabilities so install flows are written
//! once against [`DeviceIo`].

mod local;
pub mod scripts;
mod ssh;
pub mod update_conf;

pub use local::LocalDevice;
pub use ssh::{SshAuth, SshConnection, SshTarget};
pub use update_conf::UpdateConf;

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::path::Path;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::compat::{engine_for, EngineKind};
use crate::config;
use crate::error::{Result, UpdateError};
use crate::hardware::HardwareClass;
use crate::{log_debug, log_info, log_warn};

const MODULE: &str = "device";

/// Result of a command run on the device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// What the session looks like once a reboot was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterReboot {
    /// Device answered again and a fresh session is open
    Reconnected,
    /// This process runs on the device and is about to go down with it
    GoingDown,
}

/// Capabilities the install flows need from a device
#[allow(async_fn_in_trait)]
pub trait DeviceIo {
    fn is_remote(&self) -> bool;

    /// Address the device is reached at, `None` for a local session
    fn address(&self) -> Option<&str>;

    /// Run a shell command. A non-zero exit is not an error here.
    async fn run_command(&mut self, command: &str) -> Result<CommandOutput>;

    /// Copy a local file to `remote_path`
    async fn transfer_file(&mut self, local: &Path, remote_path: &str) -> Result<()>;

    /// Read a text file, `None` when it does not exist
    async fn read_file(&mut self, path: &str) -> Result<Option<String>>;

    async fn write_file(&mut self, path: &str, contents: &str) -> Result<()>;

    /// Reboot, then wait for the device and open a new session if possible
    async fn reboot_and_reconnect(&mut self) -> Result<AfterReboot>;

    /// Run a command and fail with its stderr on a non-zero exit
    async fn run_checked(&mut self, command: &str) -> Result<CommandOutput> {
        log_debug!(MODULE, "Running: {}", command);
        let output = self.run_command(command).await?;
        if !output.success() {
            return Err(UpdateError::RemoteCommandFailed {
                command: command.to_string(),
                code: output.code,
                stderr: output.stderr.trim_end().to_string(),
            });
        }
        Ok(output)
    }
}

/// Tagged session: the same code path drives either variant
pub enum DeviceSession {
    Local(LocalDevice),
    Remote(SshConnection),
}

impl DeviceIo for DeviceSession {
    fn is_remote(&self) -> bool {
        matches!(self, DeviceSession::Remote(_))
    }

    fn address(&self) -> Option<&str> {
        match self {
            DeviceSession::Local(device) => device.address(),
            DeviceSession::Remote(connection) => connection.address(),
        }
    }

    async fn run_command(&mut self, command: &str) -> Result<CommandOutput> {
        match self {
            DeviceSession::Local(device) => device.run_command(command).await,
            DeviceSession::Remote(connection) => connection.run_command(command).await,
        }
    }

    async fn transfer_file(&mut self, local: &Path, remote_path: &str) -> Result<()> {
        match self {
            DeviceSession::Local(device) => device.transfer_file(local, remote_path).await,
            DeviceSession::Remote(connection) => connection.transfer_file(local, remote_path).await,
        }
    }

    async fn read_file(&mut self, path: &str) -> Result<Option<String>> {
        match self {
            DeviceSession::Local(device) => device.read_file(path).await,
            DeviceSession::Remote(connection) => connection.read_file(path).await,
        }
    }

    async fn write_file(&mut self, path: &str, contents: &str) -> Result<()> {
        match self {
            DeviceSession::Local(device) => device.write_file(path, contents).await,
            DeviceSession::Remote(connection) => connection.write_file(path, contents).await,
        }
    }

    async fn reboot_and_reconnect(&mut self) -> Result<AfterReboot> {
        match self {
            DeviceSession::Local(device) => device.reboot_and_reconnect().await,
            DeviceSession::Remote(connection) => connection.reboot_and_reconnect().await,
        }
    }
}

impl DeviceSession {
    /// Close the SSH control connection, if any
    pub async fn close(self) {
        if let DeviceSession::Remote(connection) = self {
            connection.close().await;
        }
    }
}

/// Read the hardware class from the device identity string
pub async fn probe_hardware<D: DeviceIo>(device: &mut D) -> Result<HardwareClass> {
    let machine = device
        .read_file(config::device::MACHINE_PROBE)
        .await?
        .unwrap_or_default();
    let hardware = HardwareClass::from_machine(machine.trim());
    log_info!(MODULE, "Detected {} ({:?})", hardware, machine.trim());
    Ok(hardware)
}

/// Snapshot of the device's update state. Read fresh, never cached
/// across an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    /// `GROUP=` from xochitl.conf, `Release` when unset
    pub beta: String,
    /// The legacy engine's `update.conf` carries the release version
    pub legacy_engine_metadata: bool,
    pub version: String,
    /// Contents of /etc/version
    pub version_id: String,
    /// Version on the inactive root partition, when it could be read
    pub backup_version: Option<String>,
}

impl DeviceStatus {
    pub async fn read<D: DeviceIo>(device: &mut D, hardware: HardwareClass) -> Result<Self> {
        let conf = device.read_file(config::device::UPDATE_CONF).await?;
        let legacy_version = conf
            .as_deref()
            .and_then(|c| update_conf::value_in(c, "REMARKABLE_RELEASE_VERSION"))
            .map(str::to_string);

        let (version, legacy_engine_metadata) = match legacy_version {
            Some(version) => (version, true),
            None => {
                let os_release = device
                    .read_file(config::device::OS_RELEASE)
                    .await?
                    .unwrap_or_default();
                let version = update_conf::value_in(&os_release, "IMG_VERSION")
                    .ok_or_else(|| {
                        UpdateError::Transport(format!(
                            "Could not determine the installed version from {}",
                            config::device::OS_RELEASE
                        ))
                    })?
                    .to_string();
                (version, false)
            }
        };

        let version_id = device
            .read_file(config::device::VERSION_FILE)
            .await?
            .map(|v| v.trim().to_string())
            .unwrap_or_default();

        let beta = device
            .read_file(config::device::XOCHITL_CONF)
            .await?
            .as_deref()
            .and_then(|c| update_conf::value_in(c, "GROUP"))
            .unwrap_or("Release")
            .to_string();

        let backup_version = read_backup_version(device, hardware, &version).await;

        Ok(Self {
            beta,
            legacy_engine_metadata,
            version,
            version_id,
            backup_version,
        })
    }

    /// Engine the installed version uses
    pub fn engine(&self) -> Result<EngineKind> {
        engine_for(&self.version)
    }
}

/// Best effort: a failed mount or an unreadable partition gives `None`
async fn read_backup_version<D: DeviceIo>(
    device: &mut D,
    hardware: HardwareClass,
    current_version: &str,
) -> Option<String> {
    let modern = matches!(engine_for(current_version), Ok(EngineKind::Modern));
    let script = scripts::backup_version_script(hardware, hardware.partition_scheme(modern));

    match device.run_command(&script).await {
        Ok(output) => {
            let version = update_conf::value_in(&output.stdout, "REMARKABLE_RELEASE_VERSION")
                .or_else(|| update_conf::value_in(&output.stdout, "IMG_VERSION"))
                .map(str::to_string);
            if version.is_none() {
                log_debug!(MODULE, "No backup version found: {}", output.stderr.trim());
            }
            version
        }
        Err(e) => {
            log_warn!(MODULE, "Could not read backup partition: {}", e);
            None
        }
    }
}

/// TCP connect probe with a short timeout
pub async fn is_reachable(address: &str, port: u16) -> bool {
    log_debug!(MODULE, "Checking if {}:{} is reachable", address, port);
    let connect = TcpStream::connect((address, port));
    matches!(
        tokio::time::timeout(config::device::PROBE_TIMEOUT, connect).await,
        Ok(Ok(_))
    )
}

/// Block until `address:port` accepts connections again. There is no
/// overall deadline.
pub async fn wait_until_reachable(address: &str, port: u16, grace: Duration, interval: Duration) {
    tokio::time::sleep(grace).await;
    log_info!(MODULE, "Waiting for {} to come back", address);
    while !is_reachable(address, port).await {
        tokio::time::sleep(interval).await;
    }
    log_info!(MODULE, "{} is reachable again", address);
}

/// Local interface address that routes to `device_address`
pub fn route_address_to(device_address: &str, port: u16) -> Option<IpAddr> {
    let target: IpAddr = device_address.parse().ok()?;
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(SocketAddr::new(target, port)).ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}


#[cfg(test)]
mod tests {
    use super::fake::FakeDevice;
    use super::*;

    #[tokio::test]
    async fn test_status_legacy_device() {
        let mut device = FakeDevice::remote()
            .with_file(
                config::device::UPDATE_CONF,
                "[General]\nREMARKABLE_RELEASE_VERSION=2.15.1.1189\n",
            )
            .with_file(config::device::VERSION_FILE, "20221026104022\n")
            .with_file(config::device::XOCHITL_CONF, "[General]\nGROUP=Beta\n");

        let status = DeviceStatus::read(&mut device, HardwareClass::Rm2).await.unwrap();
        assert_eq!(status.version, "2.15.1.1189");
        assert!(status.legacy_engine_metadata);
        assert_eq!(status.version_id, "20221026104022");
        assert_eq!(status.beta, "Beta");
        assert_eq!(status.engine().unwrap(), EngineKind::Legacy);
        assert_eq!(status.backup_version, None);
    }

    #[tokio::test]
    async fn test_status_modern_device() {
        let mut device = FakeDevice::remote()
            .with_file(config::device::OS_RELEASE, "ID=codex\nIMG_VERSION=\"3.20.0.92\"\n")
            .with_file(config::device::VERSION_FILE, "20250101\n");

        let status = DeviceStatus::read(&mut device, HardwareClass::Rmpp).await.unwrap();
        assert_eq!(status.version, "3.20.0.92");
        assert!(!status.legacy_engine_metadata);
        assert_eq!(status.beta, "Release");
        assert!(device.ran("/dev/mmcblk0p"));
    }

    #[tokio::test]
    async fn test_status_without_version_fails() {
        let mut device = FakeDevice::remote();
        let result = DeviceStatus::read(&mut device, HardwareClass::Rm2).await;
        assert!(matches!(result, Err(UpdateError::Transport(_))));
    }

    #[tokio::test]
    async fn test_probe_hardware() {
        let mut device = FakeDevice::remote()
            .with_file(config::device::MACHINE_PROBE, "reMarkable Ferrari\n");
        assert_eq!(probe_hardware(&mut device).await.unwrap(), HardwareClass::Rmpp);
    }

    #[tokio::test]
    async fn test_run_checked_reports_stderr() {
        let mut device = FakeDevice::remote().respond("false", 1, "nope\n");
        let err = device.run_checked("false").await.unwrap_err();
        match err {
            UpdateError::RemoteCommandFailed { code, stderr, .. } => {
                assert_eq!(code, 1);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_is_reachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_reachable("127.0.0.1", port).await);
        drop(listener);
        assert!(!is_reachable("127.0.0.1", port).await);
    }

    #[test]
    fn test_route_address_to_loopback() {
        assert_eq!(
            route_address_to("127.0.0.1", 22),
            Some("127.0.0.1".parse().unwrap())
        );
        assert_eq!(route_address_to("not-an-ip", 22), None);
    }
}
