//! Subcommand handlers
//!
//! Each handler takes parsed options, opens whatever it needs (catalog,
//! HTTP client, device session) and prints a human-readable result.

mod download;
mod install;
mod list;
mod restore;
mod status;

pub use download::download;
pub use install::install;
pub use list::list;
pub use restore::restore;
pub use status::status;

use reqwest::Client;

use crate::config;
use crate::device::{DeviceSession, LocalDevice, SshAuth, SshConnection, SshTarget};
use crate::error::{Result, UpdateError};
use crate::prompt::Prompter;
use crate::{log_debug, log_info};

const MODULE: &str = "commands";

/// How to reach the device
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Explicit address; `None` means "this machine if it is a tablet,
    /// else the USB address"
    pub address: Option<String>,
    pub port: u16,
    /// Raw `--password` value
    pub auth: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            address: None,
            port: config::device::SSH_PORT,
            auth: None,
        }
    }
}

pub fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(config::app::USER_AGENT)
        .build()?)
}

/// Local session when running on the tablet, else SSH
pub async fn open_session<P: Prompter>(
    options: &ConnectOptions,
    prompter: &mut P,
) -> Result<DeviceSession> {
    if options.address.is_none() {
        if let Some(local) = LocalDevice::detect() {
            log_info!(MODULE, "Running directly on the device");
            return Ok(DeviceSession::Local(local));
        }
    }

    let address = options
        .address
        .clone()
        .unwrap_or_else(|| config::device::DEFAULT_ADDRESS.to_string());
    let auth = match options.auth.as_deref() {
        Some(arg) => SshAuth::from_arg(arg),
        None => prompter
            .ask_auth()
            .ok_or_else(|| UpdateError::Aborted("no SSH credentials given".to_string()))?,
    };
    log_debug!(MODULE, "Connecting to {}:{}", address, options.port);

    let connection = SshConnection::connect(SshTarget {
        address,
        port: options.port,
        auth,
    })
    .await?;
    Ok(DeviceSession::Remote(connection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::scripted::ScriptedPrompter;

    #[tokio::test]
    async fn test_open_session_unreachable_address() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let options = ConnectOptions {
            address: Some("127.0.0.1".to_string()),
            port,
            auth: Some(" ".to_string()),
        };
        let result = open_session(&options, &mut ScriptedPrompter::default()).await;
        assert!(matches!(result, Err(UpdateError::Unreachable(_))));
    }

    #[test]
    fn test_default_options_use_ssh_port() {
        let options = ConnectOptions::default();
        assert_eq!(options.port, 22);
        assert!(options.address.is_none());
    }
}
