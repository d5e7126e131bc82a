//! Compatibility gate
//!
//! Pure decisions about which update engine a version uses, whether a
//! device may move to a target version, and whether the move crosses the
//! Paper Pro bootloader boundary. No I/O in here.

use crate::error::{Result, UpdateError};
use crate::hardware::HardwareClass;
use crate::version::Version;

/// Update mechanism on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Image-based engine polling an update-check server
    Legacy,
    /// Signed single-package installer
    Modern,
}

/// `(major, minor)` at which the bootloader layout changed
pub const BOOTLOADER_BOUNDARY: (u64, u64) = (3, 22);

/// Classify a version by engine.
///
/// Major and minor are checked independently: `4.0.x.x` is Legacy under
/// this rule. Kept as-is until product intent says otherwise.
pub fn engine_for(version: &str) -> Result<EngineKind> {
    let parsed = Version::parse(version)?;
    if parsed.major() >= 3 && parsed.minor() >= 11 {
        Ok(EngineKind::Modern)
    } else {
        Ok(EngineKind::Legacy)
    }
}

/// Refuse any install that would cross between engines
pub fn assert_compatible(device_version: &str, target_version: &str) -> Result<()> {
    let device_engine = engine_for(device_version)?;
    let target_engine = engine_for(target_version)?;

    match (device_engine, target_engine) {
        (EngineKind::Modern, EngineKind::Legacy) => Err(UpdateError::EngineMismatch(format!(
            "Cannot downgrade from {} to {} as it uses the old update engine, please downgrade manually \
             (download the image, extract it, write it to the fallback partition, then run `codexctl restore`)",
            device_version, target_version
        ))),
        (EngineKind::Legacy, EngineKind::Modern) => Err(UpdateError::EngineMismatch(format!(
            "Version {} requires the new update engine, please upgrade your device to {} first",
            target_version,
            crate::config::catalog::LAST_VENDOR_VERSION
        ))),
        _ => Ok(()),
    }
}

/// Refuse legacy-engine targets on hardware that never had that engine
pub fn assert_engine_available(hardware: HardwareClass, target_version: &str) -> Result<()> {
    if engine_for(target_version)? == EngineKind::Legacy && !hardware.has_legacy_engine() {
        return Err(UpdateError::LegacyEngineUnavailable {
            hardware,
            version: target_version.to_string(),
        });
    }
    Ok(())
}

/// Strict boundary check. Errors when either side is not a dotted
/// numeric version, so callers can tell "not crossing" from "unknown".
pub fn check_bootloader_boundary(current: &str, target: &str) -> Result<bool> {
    let current = Version::parse(current)?.major_minor();
    let target = Version::parse(target)?.major_minor();
    Ok(current >= BOOTLOADER_BOUNDARY && target < BOOTLOADER_BOUNDARY)
}

/// Boundary check for interactive flows: malformed input means no boundary
pub fn is_bootloader_boundary_downgrade(current: &str, target: &str) -> bool {
    check_bootloader_boundary(current, target).unwrap_or(false)
}
