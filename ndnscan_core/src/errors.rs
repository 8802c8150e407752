//! Error handling and C-ABI error codes for ndnscan

use std::cell::RefCell;
use std::os::raw::c_char;
use thiserror::Error as ThisError;

/// Why a key was refused before touching the index.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ThisError)]
pub enum KeyError {
    #[error("shorter than 2 bytes")]
    TooShort,
    #[error("longer than 255 bytes")]
    TooLong,
    #[error("does not end with '/'")]
    MissingTerminator,
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// The log ran out of headroom. The index was sized too small for its
    /// workload and must be rebuilt larger.
    #[error("log capacity exhausted (head={log_head}, capacity={log_capacity})")]
    CapacityExhausted { log_head: u64, log_capacity: u64 },
    /// Both candidate buckets of one key are full.
    #[error("both candidate buckets are full")]
    BucketFull,
    #[error("invalid key: {0}")]
    InvalidKey(KeyError),
    #[error("terminal prefix inserted without a destination port")]
    MissingPort,
    #[error("port {0} out of range")]
    InvalidPort(u8),
    #[error("invalid geometry: {0}")]
    InvalidGeometry(&'static str),
    #[error("shared region was created with a different geometry or hasher")]
    GeometryMismatch,
    #[error("handle is attached read-only")]
    ReadOnly,
    #[error("shared memory: {0}")]
    Shmem(String),
    #[error("shared region was never initialised by its creator")]
    NotInitialized,
}

impl Error {
    /// Fatal errors mean the structure cannot keep accepting writes.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::CapacityExhausted { .. })
    }
}

impl From<KeyError> for Error {
    fn from(e: KeyError) -> Self {
        Error::InvalidKey(e)
    }
}

impl From<shared_memory::ShmemError> for Error {
    fn from(e: shared_memory::ShmemError) -> Self {
        Error::Shmem(e.to_string())
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    CapacityExhausted = 1,
    BucketFull = 2,
    InvalidKey = 3,
    MissingPort = 4,
    InvalidPort = 5,
    InvalidGeometry = 6,
    GeometryMismatch = 7,
    ReadOnly = 8,
    ShmemOpenFailed = 9,
    NotInitialized = 10,
    InvalidHandle = 11,
    Utf8Error = 12,
    NotFound = 13,
    Unknown = 255,
}

impl ErrorCode {
    /// NUL-terminated so the pointer can be handed straight to C.
    pub fn as_cstr(self) -> &'static str {
        match self {
            ErrorCode::Success => "Success\0",
            ErrorCode::CapacityExhausted => "Log capacity exhausted\0",
            ErrorCode::BucketFull => "Candidate buckets full\0",
            ErrorCode::InvalidKey => "Invalid key\0",
            ErrorCode::MissingPort => "Missing destination port\0",
            ErrorCode::InvalidPort => "Invalid destination port\0",
            ErrorCode::InvalidGeometry => "Invalid geometry\0",
            ErrorCode::GeometryMismatch => "Geometry mismatch\0",
            ErrorCode::ReadOnly => "Read-only handle\0",
            ErrorCode::ShmemOpenFailed => "Shared memory open failed\0",
            ErrorCode::NotInitialized => "Region not initialised\0",
            ErrorCode::InvalidHandle => "Invalid handle\0",
            ErrorCode::Utf8Error => "UTF-8 conversion error\0",
            ErrorCode::NotFound => "Not found\0",
            ErrorCode::Unknown => "Unknown error\0",
        }
    }

    pub fn as_str(self) -> &'static str {
        self.as_cstr().trim_end_matches('\0')
    }
}

// Thread-local last error for C-ABI
thread_local! {
    static LAST_ERROR: RefCell<ErrorCode> = const { RefCell::new(ErrorCode::Success) };
}

pub fn set_last_error(code: ErrorCode) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = code);
}

pub fn get_last_error() -> ErrorCode {
    LAST_ERROR.with(|cell| *cell.borrow())
}

#[no_mangle]
pub extern "C" fn ndn_last_error() -> ErrorCode {
    get_last_error()
}

#[no_mangle]
pub extern "C" fn ndn_strerror(code: ErrorCode) -> *const c_char {
    code.as_cstr().as_ptr() as *const c_char
}

// Map internal Error to ErrorCode
pub fn map_error(e: &Error) -> ErrorCode {
    use Error::*;
    match e {
        CapacityExhausted { .. } => ErrorCode::CapacityExhausted,
        BucketFull => ErrorCode::BucketFull,
        InvalidKey(_) => ErrorCode::InvalidKey,
        MissingPort => ErrorCode::MissingPort,
        InvalidPort(_) => ErrorCode::InvalidPort,
        InvalidGeometry(_) => ErrorCode::InvalidGeometry,
        GeometryMismatch => ErrorCode::GeometryMismatch,
        ReadOnly => ErrorCode::ReadOnly,
        Shmem(_) => ErrorCode::ShmemOpenFailed,
        NotInitialized => ErrorCode::NotInitialized,
    }
}
