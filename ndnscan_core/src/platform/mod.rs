//! Platform-specific module for ndnscan

#[cfg(target_os = "windows")]
pub mod windows;
#[cfg(unix)]
pub mod unix;
