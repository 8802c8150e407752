//! Windows-specific platform code for ndnscan

#[cfg(target_os = "windows")]
pub fn make_os_id(prefix: &str, hash: u64) -> String {
    format!("{prefix}{hash:016x}")
}

#[cfg(target_os = "windows")]
/// On Windows the named mapping disappears with its last handle, and the
/// shared memory crate removes its backing file on drop.
pub fn platform_drop(_os_id: &str) {}
