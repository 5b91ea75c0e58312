use tracing::debug;

use ringside_types::models::DeviceInfo;

use crate::cache::LocalCache;

/// Describe this host for direct message inserts. The id comes from the
/// cache so it is stable across launches.
pub fn collect(cache: &LocalCache) -> DeviceInfo {
    let info = DeviceInfo {
        device_id: cache.load_or_create_device_id(),
        device_name: device_name(),
        is_tablet: false,
        system_version: system_version(),
    };
    debug!("Device {} ({}, {})", info.device_id, info.device_name, info.system_version);
    info
}

fn device_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.trim().is_empty())
        .unwrap_or_else(|| std::env::consts::OS.to_string())
}

/// The OS release, e.g. "Debian GNU/Linux 12 (bookworm)" or "linux 6.1.0".
/// Falls back to the bare OS name where the release cannot be read.
fn system_version() -> String {
    let os = std::env::consts::OS;
    if let Some(name) = std::fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|contents| pretty_name(&contents))
    {
        return name;
    }
    match std::fs::read_to_string("/proc/sys/kernel/osrelease") {
        Ok(release) if !release.trim().is_empty() => format!("{} {}", os, release.trim()),
        _ => {
            debug!("No OS release available on {}", os);
            os.to_string()
        }
    }
}

/// `PRETTY_NAME` from an os-release file, unquoted.
fn pretty_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|line| line.trim().strip_prefix("PRETTY_NAME="))
        .map(|value| value.trim().trim_matches(|c: char| c == '"' || c == '\'').to_string())
        .filter(|value| !value.is_empty())
}
