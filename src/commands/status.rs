use crate::device::{probe_hardware, DeviceStatus};
use crate::error::Result;
use crate::prompt::Prompter;

use super::{open_session, ConnectOptions};

pub async fn status<P: Prompter>(options: &ConnectOptions, prompter: &mut P) -> Result<()> {
    let mut session = open_session(options, prompter).await?;
    let result = async {
        let hardware = probe_hardware(&mut session).await?;
        DeviceStatus::read(&mut session, hardware).await
    }
    .await;
    session.close().await;

    println!("{}", render(&result?));
    Ok(())
}

fn render(status: &DeviceStatus) -> String {
    let mut out = format!(
        "Current version: {}\nOld update engine: {}\nBeta active: {}\nVersion id: {}",
        status.version,
        status.legacy_engine_metadata,
        status.beta,
        status.version_id
    );
    if let Some(backup) = &status.backup_version {
        out.push_str(&format!("\nBackup version: {}", backup));
    }
    out
}
