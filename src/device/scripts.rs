//! Shell programs run on the device
//!
//! Partition switching differs per generation; each scheme gets its own
//! literal script.

use crate::config;
use crate::hardware::{HardwareClass, PartitionScheme};

/// u-boot environment switch between root partitions 2 and 3
const UBOOT_ENV_RESTORE: &str = r#"/sbin/fw_setenv "upgrade_available" "1"
/sbin/fw_setenv "bootcount" "0"

OLDPART=$(/sbin/fw_printenv -n active_partition)
if [ $OLDPART  ==  "2" ]; then
    NEWPART="3"
else
    NEWPART="2"
fi
echo "new: ${NEWPART}"
echo "fallback: ${OLDPART}"

/sbin/fw_setenv "fallback_partition" "${OLDPART}"
/sbin/fw_setenv "active_partition" "${NEWPART}"
"#;

const SYSFS_RESTORE: &str = r#"#!/bin/bash
OLDPART=$(< /sys/devices/platform/lpgpr/root_part)
if [[ $OLDPART == "a" ]]; then
    NEWPART="b"
else
    NEWPART="a"
fi
echo "new: ${NEWPART}"
echo "fallback: ${OLDPART}"
echo $NEWPART > /sys/devices/platform/lpgpr/root_part
"#;

const MMC_BOOTPART_RESTORE: &str = r#"#!/bin/bash
OLDPART=$(< /sys/devices/platform/lpgpr/root_part)
if [[ $OLDPART == "a" ]]; then
    NEWPART="b"
    BOOTPART=2
else
    NEWPART="a"
    BOOTPART=1
fi
echo "new: ${NEWPART}"
echo "fallback: ${OLDPART}"
echo $NEWPART > /sys/devices/platform/lpgpr/root_part
mmc bootpart enable $BOOTPART 0 /dev/mmcblk0
"#;

/// Script that makes the inactive root partition the active one
pub fn restore_script(scheme: PartitionScheme) -> &'static str {
    match scheme {
        PartitionScheme::UbootEnv => UBOOT_ENV_RESTORE,
        PartitionScheme::Sysfs => SYSFS_RESTORE,
        PartitionScheme::MmcBootPart => MMC_BOOTPART_RESTORE,
    }
}

/// Shell expression printing the inactive root partition number
fn inactive_partition_expr(scheme: PartitionScheme) -> String {
    match scheme {
        PartitionScheme::UbootEnv => {
            "$( [ \"$(/sbin/fw_printenv -n active_partition)\" = \"2\" ] && echo 3 || echo 2 )"
                .to_string()
        }
        PartitionScheme::Sysfs | PartitionScheme::MmcBootPart => format!(
            "$( [ \"$(cat {})\" = \"a\" ] && echo 3 || echo 2 )",
            config::device::ROOT_PART_SYSFS
        ),
    }
}

/// Mount the inactive root partition read-only and print its version files.
///
/// Output is the `update.conf` and `os-release` contents of the backup
/// system, whichever exist.
pub fn backup_version_script(hardware: HardwareClass, scheme: PartitionScheme) -> String {
    let mount = config::device::BACKUP_MOUNT;
    format!(
        "PART={disk}p{part}; mkdir -p {mount} && mount -o ro $PART {mount} && \
         {{ cat {mount}{conf} 2>/dev/null; cat {mount}{release} 2>/dev/null; }}; \
         umount {mount} 2>/dev/null; rmdir {mount} 2>/dev/null; true",
        disk = hardware.root_disk(),
        part = inactive_partition_expr(scheme),
        mount = mount,
        conf = config::device::UPDATE_CONF,
        release = config::device::OS_RELEASE,
    )
}

/// Single-quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
