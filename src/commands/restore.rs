//! Switch the device back to its other root partition

use crate::compat::EngineKind;
use crate::config;
use crate::device::scripts::{restore_script, shell_quote};
use crate::device::{probe_hardware, AfterReboot, DeviceIo, DeviceStatus};
use crate::error::Result;
use crate::hardware::{HardwareClass, PartitionScheme};
use crate::prompt::Prompter;
use crate::{log_info, log_warn};

use super::{open_session, ConnectOptions, MODULE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub scheme: PartitionScheme,
    /// Version that was on the inactive partition, when readable
    pub restored_version: Option<String>,
    pub after_reboot: AfterReboot,
}

pub async fn restore<P: Prompter>(options: &ConnectOptions, prompter: &mut P) -> Result<()> {
    let mut session = open_session(options, prompter).await?;
    let result = async {
        let hardware = probe_hardware(&mut session).await?;
        let status = DeviceStatus::read(&mut session, hardware).await?;
        restore_backup(&mut session, &status, hardware).await
    }
    .await;
    session.close().await;

    let report = result?;
    match &report.restored_version {
        Some(version) => println!("Device restored to previous version [{}]", version),
        None => println!("Device restored to previous version"),
    }
    if report.after_reboot == AfterReboot::Reconnected {
        println!("Device rebooted");
    }
    Ok(())
}

/// Write the switch script for this generation, run it and reboot
pub async fn restore_backup<D: DeviceIo>(
    device: &mut D,
    status: &DeviceStatus,
    hardware: HardwareClass,
) -> Result<RestoreReport> {
    let modern = matches!(status.engine(), Ok(EngineKind::Modern));
    let scheme = hardware.partition_scheme(modern);
    if status.backup_version.is_none() {
        log_warn!(MODULE, "Backup partition version unknown, switching anyway");
    }

    log_info!(MODULE, "Switching root partition ({:?})", scheme);
    device
        .write_file(config::device::RESTORE_SCRIPT, restore_script(scheme))
        .await?;
    let script = shell_quote(config::device::RESTORE_SCRIPT);
    device.run_checked(&format!("chmod +x {}", script)).await?;
    device.run_checked(&script).await?;

    let after_reboot = device.reboot_and_reconnect().await?;
    Ok(RestoreReport {
        scheme,
        restored_version: status.backup_version.clone(),
        after_reboot,
    })
}
