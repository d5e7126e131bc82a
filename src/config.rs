//! Application configuration
//!
//! Compile-time constants grouped by concern. Runtime options come from
//! the command line.

/// Application identity
pub mod app {
    /// Name used for the config directory and the HTTP user agent
    pub const NAME: &str = "codexctl";
    pub const USER_AGENT: &str = concat!("codexctl/", env!("CARGO_PKG_VERSION"));
}

/// Remote endpoints
pub mod urls {
    /// Canonical version manifest
    pub const VERSION_MANIFEST: &str =
        "https://raw.githubusercontent.com/Jayy001/codexctl/main/data/version-ids.json";
    /// Third-party compatibility table (`rm1=<version>` lines)
    pub const TOLTEC_COMPATIBILITY: &str = "https://toltec-dev.org/stable/Compatibility";
    /// Vendor build server for 1.x/2.x releases
    pub const VENDOR_BETA_BASE: &str =
        "https://updates-download.cloud.remarkable.engineering/build/reMarkable%20Device%20Beta/RM110";
    /// Vendor build server for 3.x releases (suffixed with `2` for the second generation)
    pub const VENDOR_BASE: &str =
        "https://updates-download.cloud.remarkable.engineering/build/reMarkable%20Device/reMarkable";
    /// Placeholder substituted with the source id in provider templates
    pub const PROVIDER_PLACEHOLDER: &str = "REPLACE_ID";
}

/// Version catalog settings
pub mod catalog {
    /// Cache file name, both in `./data` and in the config directory
    pub const CACHE_FILE: &str = "version-ids.json";
    /// Developer checkout location checked before the config directory
    pub const LOCAL_DATA_DIR: &str = "data";
    /// Seconds after `last-updated` before the manifest is fetched again (about two months)
    pub const RETENTION_SECS: i64 = 5_256_000;
    /// Last version served from the vendor build server
    pub const LAST_VENDOR_VERSION: &str = "3.11.2.5";
}

/// Download settings
pub mod download {
    /// Anything smaller than this is not a firmware image
    pub const MIN_ARTIFACT_SIZE: u64 = 10_000_000;
    /// Read buffer for hashing local files
    pub const CHUNK_SIZE: usize = 8192;
}

/// On-device paths, commands and timings
pub mod device {
    use std::time::Duration;

    pub const DEFAULT_ADDRESS: &str = "10.11.99.1";
    pub const SSH_PORT: u16 = 22;
    pub const SSH_USER: &str = "root";

    pub const MACHINE_PROBE: &str = "/sys/devices/soc0/machine";
    pub const UPDATE_CONF: &str = "/usr/share/remarkable/update.conf";
    pub const OS_RELEASE: &str = "/etc/os-release";
    pub const VERSION_FILE: &str = "/etc/version";
    pub const XOCHITL_CONF: &str = "/home/root/.config/remarkable/xochitl.conf";
    pub const ROOT_PART_SYSFS: &str = "/sys/devices/platform/lpgpr/root_part";

    pub const STAGING_DIR: &str = "/tmp";
    pub const RESTORE_SCRIPT: &str = "/tmp/restore.sh";
    pub const BACKUP_MOUNT: &str = "/tmp/codexctl-backup";

    pub const SWUPDATE: &str = "/usr/bin/swupdate";
    pub const SWUPDATE_KEY: &str = "/usr/share/swupdate/swupdate-payload-key-pub.pem";
    pub const UPDATE_ENGINE_CLIENT: &str = "/usr/bin/update_engine_client";

    /// Bootloader files shipped inside Paper Pro packages
    pub const BOOTLOADER_SCRIPT: &str = "update-bootloader.sh";
    pub const BOOT_IMAGE: &str = "imx-boot";

    /// Port of the local update-check responder
    pub const RESPONDER_PORT: u16 = 8085;

    /// Grace period before polling a rebooting device
    pub const REBOOT_GRACE: Duration = Duration::from_secs(2);
    /// Interval between reachability probes
    pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
    /// Timeout of a single reachability probe
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

    /// PATH used for commands run on the device itself
    pub const LOCAL_PATH: &str = "/bin:/usr/bin:/sbin";
}

/// Logging configuration
pub mod logging {
    /// Interval in MB between download progress logs
    pub const DOWNLOAD_LOG_INTERVAL_MB: u64 = 50;
}
