//! Unix-specific platform code for ndnscan

/// POSIX shm names start with a single slash.
#[cfg(unix)]
pub fn make_os_id(prefix: &str, hash: u64) -> String {
    format!("/{prefix}{hash:016x}")
}

#[cfg(unix)]
pub fn platform_drop(os_id: &str) {
    use std::ffi::CString;
    unsafe {
        if let Ok(c_name) = CString::new(os_id) {
            let _ = libc::shm_unlink(c_name.as_ptr());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_id_is_a_posix_shm_name() {
        let id = make_os_id("ndnscan_", 0xABCD);
        assert_eq!(id, "/ndnscan_000000000000abcd");
        assert_eq!(id.matches('/').count(), 1);
    }
}
