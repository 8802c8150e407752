//! Constants and geometry for the NDN prefix index

pub const PREFIX: &str = "ndnscan_"; // shm os-id prefix

pub const FNV_OFFSET: u64 = 0xcbf29ce484222325;
pub const FNV_PRIME: u64 = 0x100000001b3;

pub const CACHE_LINE: usize = 64;

/// Slots per bucket.
pub const BUCKET_WAYS: usize = 8;

/// Every stored prefix ends with this byte.
pub const TERMINATOR: u8 = b'/';

/// Shortest legal prefix: one component byte plus the terminator.
pub const MIN_KEY_LEN: usize = 2;
/// Key length is stored in a single byte.
pub const MAX_KEY_LEN: usize = u8::MAX as usize;

/// `length`, `is_terminal`, `dst_port`.
pub const RECORD_HEADER_LEN: usize = 3;
/// Worst-case record size; checked before every append.
pub const LOG_HEADROOM: usize = RECORD_HEADER_LEN + MAX_KEY_LEN;

pub const OFFSET_BITS: u32 = 48;
pub const MAX_LOG_CAPACITY: u64 = 1 << OFFSET_BITS;

// is_terminal byte states
pub const NON_TERMINAL: u8 = 0;
pub const TERMINAL: u8 = 1;
pub const UPGRADING: u8 = 2;

/// Stored in the port byte of non-terminal records (`-1i8`).
pub const NO_PORT: u8 = 0xFF;
pub const MAX_PORT_ID: u8 = i8::MAX as u8;

/// Progress is logged every time this many names have been loaded.
pub const LOAD_PROGRESS_MASK: u64 = (512 * 1024) - 1;

pub const HEADER_MAGIC: u64 = 0x4E444E5343414E31; // "NDNSCAN1"
pub const HEADER_VERSION: u16 = 1;
