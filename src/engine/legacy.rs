//! Legacy engine path
//!
//! The device polls an update-check server. A local responder offering the
//! one artifact is started, `update.conf` is pointed at it and the engine
//! is asked to check once.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use super::{EngineOrchestrator, InstallState, MODULE};
use crate::config;
use crate::device::{route_address_to, DeviceIo, UpdateConf};
use crate::error::{Result, UpdateError};
use crate::prompt::Prompter;
use crate::server::{UpdateOffer, UpdateResponder};
use crate::{log_debug, log_info};

const START_DAEMON: &str = "systemctl start update-engine";
const STOP_DAEMON: &str = "systemctl stop update-engine";

impl<'a, D: DeviceIo, P: Prompter> EngineOrchestrator<'a, D, P> {
    pub(super) async fn install_legacy(
        &mut self,
        artifact: &Path,
        version: &str,
    ) -> Result<Option<bool>> {
        self.enter(InstallState::Transferring);
        let host = self.responder_host()?;
        let offer = UpdateOffer::from_file(artifact, version, self.hardware.legacy_platform())?;

        let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.responder_port));
        let responder = UpdateResponder::start(bind, &host, vec![offer]).await?;
        let port = responder.local_addr().port();

        let server_url = responder.base_url().trim_end_matches('/').to_string();
        let activated = self.activate_legacy(&server_url, &host, port).await;
        responder.stop().await;
        activated?;

        self.reboot_and_disable(STOP_DAEMON).await
    }

    async fn activate_legacy(&mut self, server_url: &str, host: &str, port: u16) -> Result<()> {
        let contents = self
            .device
            .read_file(config::device::UPDATE_CONF)
            .await?
            .ok_or_else(|| {
                UpdateError::Transport(format!("{} not found on device", config::device::UPDATE_CONF))
            })?;

        let mut conf = UpdateConf::parse(&contents);
        if let Some(previous) = conf.active_server() {
            log_debug!(MODULE, "Replacing update server {}", previous);
        }
        conf.set_server(server_url);
        log_debug!(MODULE, "New update.conf:\n{}", conf);
        self.device
            .write_file(config::device::UPDATE_CONF, &conf.to_string())
            .await?;
        log_info!(MODULE, "Device pointed at {}", server_url);

        self.enter(InstallState::Activating);
        if self.device.is_remote() {
            log_info!(MODULE, "Checking if the device can connect to this machine");
            let check = self
                .device
                .run_command(&format!("sleep 2 && echo | nc {} {}", host, port))
                .await?;
            if !check.success() {
                return Err(UpdateError::Transport(format!(
                    "Device cannot connect to this machine at {}:{}. Is the firewall blocking connections?",
                    host, port
                )));
            }
        }

        log_info!(MODULE, "Starting update service on device");
        self.device.run_checked(START_DAEMON).await?;
        self.device
            .run_checked(&format!("{} -update", config::device::UPDATE_ENGINE_CLIENT))
            .await?;
        Ok(())
    }

    /// `--host`, loopback on the device itself, else the routed interface
    /// address confirmed by the operator
    fn responder_host(&mut self) -> Result<String> {
        if let Some(host) = &self.responder_host {
            return Ok(host.clone());
        }
        if !self.device.is_remote() {
            return Ok(Ipv4Addr::LOCALHOST.to_string());
        }

        let suggestion = self
            .device
            .address()
            .and_then(|address| route_address_to(address, config::device::SSH_PORT))
            .map(|ip| ip.to_string());
        let host = self
            .prompter
            .ask_host(suggestion.as_deref())
            .ok_or_else(|| UpdateError::Aborted("no host address for the update server".to_string()))?;
        self.responder_host = Some(host.clone());
        Ok(host)
    }
}
