//! Hardware generations
//!
//! The class is fixed for a session: probed from the device identity
//! string, or given on the command line when no device is connected.

use std::fmt;
use std::str::FromStr;

/// Tablet generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HardwareClass {
    Rm1,
    Rm2,
    /// Paper Pro ("Ferrari")
    Rmpp,
    /// Paper Pro Move ("Chiappa")
    Rmppm,
}

/// How the active root partition is switched on this generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionScheme {
    /// u-boot environment variables (`fw_setenv active_partition`)
    UbootEnv,
    /// `root_part` sysfs file
    Sysfs,
    /// `root_part` sysfs file plus eMMC boot partition selection
    MmcBootPart,
}

impl HardwareClass {
    pub const ALL: [HardwareClass; 4] = [
        HardwareClass::Rmpp,
        HardwareClass::Rmppm,
        HardwareClass::Rm2,
        HardwareClass::Rm1,
    ];

    /// Classify the contents of `/sys/devices/soc0/machine`.
    ///
    /// Unknown strings fall back to the second generation.
    pub fn from_machine(machine: &str) -> Self {
        if machine.contains("Ferrari") {
            HardwareClass::Rmpp
        } else if machine.contains("Chiappa") {
            HardwareClass::Rmppm
        } else if machine.contains("reMarkable 1") {
            HardwareClass::Rm1
        } else {
            HardwareClass::Rm2
        }
    }

    /// Table name in version-ids.json
    pub fn catalog_key(self) -> &'static str {
        match self {
            HardwareClass::Rm1 => "remarkable1",
            HardwareClass::Rm2 => "remarkable2",
            HardwareClass::Rmpp => "remarkablepp",
            HardwareClass::Rmppm => "remarkableppm",
        }
    }

    /// Name the native installer expects in `-H <name>:1.0`, also used in
    /// provider file names
    pub fn swupdate_name(self) -> &'static str {
        match self {
            HardwareClass::Rm1 => "reMarkable1",
            HardwareClass::Rm2 => "reMarkable2",
            HardwareClass::Rmpp => "ferrari",
            HardwareClass::Rmppm => "chiappa",
        }
    }

    /// Product name in vendor file names and legacy update checks
    pub fn legacy_platform(self) -> &'static str {
        match self {
            HardwareClass::Rm1 => "reMarkable",
            HardwareClass::Rm2 => "reMarkable2",
            HardwareClass::Rmpp => "ferrari",
            HardwareClass::Rmppm => "chiappa",
        }
    }

    /// Key in the toltec compatibility table, if toltec supports this device
    pub fn toltec_key(self) -> Option<&'static str> {
        match self {
            HardwareClass::Rm1 => Some("rm1"),
            HardwareClass::Rm2 => Some("rm2"),
            HardwareClass::Rmpp | HardwareClass::Rmppm => None,
        }
    }

    /// Whether this generation ever shipped the image-based update engine
    pub fn has_legacy_engine(self) -> bool {
        matches!(self, HardwareClass::Rm1 | HardwareClass::Rm2)
    }

    /// Both Paper Pro generations share the bootloader layout that changed
    /// at 3.22. The Move shipped after 3.22, so for it the downgrade
    /// pre-step never triggers in practice.
    pub fn has_bootloader_boundary(self) -> bool {
        matches!(self, HardwareClass::Rmpp | HardwareClass::Rmppm)
    }

    /// eMMC device holding the root partitions
    pub fn root_disk(self) -> &'static str {
        match self {
            HardwareClass::Rm1 => "/dev/mmcblk1",
            HardwareClass::Rm2 => "/dev/mmcblk2",
            HardwareClass::Rmpp | HardwareClass::Rmppm => "/dev/mmcblk0",
        }
    }

    /// Partition switch mechanism. The second generation moved from u-boot
    /// variables to sysfs together with the engine change.
    pub fn partition_scheme(self, modern_engine: bool) -> PartitionScheme {
        match self {
            HardwareClass::Rm1 => PartitionScheme::UbootEnv,
            HardwareClass::Rm2 if modern_engine => PartitionScheme::Sysfs,
            HardwareClass::Rm2 => PartitionScheme::UbootEnv,
            HardwareClass::Rmpp | HardwareClass::Rmppm => PartitionScheme::MmcBootPart,
        }
    }
}

impl fmt::Display for HardwareClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HardwareClass::Rm1 => "reMarkable 1",
            HardwareClass::Rm2 => "reMarkable 2",
            HardwareClass::Rmpp => "reMarkable Paper Pro",
            HardwareClass::Rmppm => "reMarkable Paper Pro Move",
        };
        f.write_str(name)
    }
}

impl FromStr for HardwareClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();

        match normalized.as_str() {
            "rm1" | "remarkable1" => Ok(HardwareClass::Rm1),
            "rm2" | "remarkable2" => Ok(HardwareClass::Rm2),
            "rmpp" | "ferrari" | "remarkablepp" | "remarkablepaperpro" | "paperpro" => {
                Ok(HardwareClass::Rmpp)
            }
            "rmppm" | "chiappa" | "remarkableppm" | "remarkablepaperpromove"
            | "paperpromove" => Ok(HardwareClass::Rmppm),
            _ => Err(format!(
                "Unknown hardware {:?} (expected rm1, rm2, rmpp or rmppm)",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_machine() {
        assert_eq!(HardwareClass::from_machine("reMarkable 1.0"), HardwareClass::Rm1);
        assert_eq!(HardwareClass::from_machine("reMarkable 2.0"), HardwareClass::Rm2);
        assert_eq!(HardwareClass::from_machine("reMarkable Ferrari"), HardwareClass::Rmpp);
        assert_eq!(HardwareClass::from_machine("reMarkable Chiappa"), HardwareClass::Rmppm);
        assert_eq!(HardwareClass::from_machine("something else"), HardwareClass::Rm2);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("rm1".parse::<HardwareClass>().unwrap(), HardwareClass::Rm1);
        assert_eq!("reMarkable2".parse::<HardwareClass>().unwrap(), HardwareClass::Rm2);
        assert_eq!("ferrari".parse::<HardwareClass>().unwrap(), HardwareClass::Rmpp);
        assert_eq!("Paper Pro Move".parse::<HardwareClass>().unwrap(), HardwareClass::Rmppm);
        assert!("kindle".parse::<HardwareClass>().is_err());
    }

    #[test]
    fn test_engine_support() {
        assert!(HardwareClass::Rm2.has_legacy_engine());
        assert!(!HardwareClass::Rmpp.has_legacy_engine());
        assert!(HardwareClass::Rmpp.has_bootloader_boundary());
        assert!(HardwareClass::Rmppm.has_bootloader_boundary());
        assert!(!HardwareClass::Rm2.has_bootloader_boundary());
    }

    #[test]
    fn test_partition_scheme() {
        assert_eq!(HardwareClass::Rm1.partition_scheme(true), PartitionScheme::UbootEnv);
        assert_eq!(HardwareClass::Rm2.partition_scheme(false), PartitionScheme::UbootEnv);
        assert_eq!(HardwareClass::Rm2.partition_scheme(true), PartitionScheme::Sysfs);
        assert_eq!(HardwareClass::Rmpp.partition_scheme(true), PartitionScheme::MmcBootPart);
    }
}
