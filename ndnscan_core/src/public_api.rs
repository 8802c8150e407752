use crate::{
    errors::{map_error, set_last_error, ErrorCode},
    HashIndex, PortId,
};
use std::{
    ffi::CStr,
    os::raw::{c_char, c_int},
};

/// Opaque handle – **always** treated as owned by the caller.
pub type NdnHandle = *mut HashIndex;

// ─────────────────────────── helpers ─────────────────────────────────── //

#[inline]
fn cstr<'a>(p: *const c_char) -> Result<&'a str, ErrorCode> {
    if p.is_null() {
        return Err(ErrorCode::Utf8Error);
    }
    unsafe { CStr::from_ptr(p) }
        .to_str()
        .map_err(|_| ErrorCode::Utf8Error)
}

#[inline]
fn key_slice<'a>(p: *const u8, len: usize) -> Result<&'a [u8], ErrorCode> {
    if p.is_null() {
        return Err(ErrorCode::InvalidKey);
    }
    Ok(unsafe { std::slice::from_raw_parts(p, len) })
}

/// Negative means "no port".
#[inline]
fn port(raw: c_int) -> Result<Option<PortId>, ErrorCode> {
    if raw < 0 {
        return Ok(None);
    }
    let raw = u8::try_from(raw).map_err(|_| ErrorCode::InvalidPort)?;
    PortId::new(raw).map(Some).map_err(|e| map_error(&e))
}

#[inline]
fn fail(code: ErrorCode) -> ErrorCode {
    set_last_error(code);
    code
}

// ─── small helper to turn Result<T,ErrorCode> into early-return ──────────
macro_rules! try_c { ($expr:expr) => { match $expr {
    Ok(v)  => v,
    Err(e) => return fail(e),
}}}

// ───────────────────────── lifetime ──────────────────────────────────── //

/// Open (or create) a shared-memory index.
/// Returns `Success` **and** stores the handle in `*out`
/// -- or an error code otherwise.
#[no_mangle]
pub extern "C" fn ndn_open(
    name_utf8: *const c_char,
    num_buckets: usize,
    log_capacity: u64,
    out: *mut NdnHandle,
) -> ErrorCode {
    if out.is_null() {
        return fail(ErrorCode::InvalidHandle);
    }
    let name = try_c!(cstr(name_utf8));
    match HashIndex::open(name, num_buckets, log_capacity) {
        Ok(index) => unsafe {
            *out = Box::into_raw(Box::new(index));
            ErrorCode::Success
        },
        Err(e) => fail(map_error(&e)),
    }
}

#[no_mangle]
pub extern "C" fn ndn_close(h: NdnHandle) {
    if !h.is_null() {
        unsafe { drop(Box::from_raw(h)) };
    }
}

// ───────────────────────── mutation ──────────────────────────────────── //

/// Insert one prefix. Caller guarantees no other thread uses `h` meanwhile.
#[no_mangle]
pub extern "C" fn ndn_insert(
    h: NdnHandle,
    key_ptr: *const u8,
    key_len: usize,
    is_terminal: bool,
    dst_port: c_int,
) -> ErrorCode {
    let index = match unsafe { h.as_mut() } { Some(t) => t, None => return fail(ErrorCode::InvalidHandle) };
    let key = try_c!(key_slice(key_ptr, key_len));
    let dst = try_c!(port(dst_port));
    match index.insert(key, is_terminal, dst) {
        Ok(_) => ErrorCode::Success,
        Err(e) => fail(map_error(&e)),
    }
}

// ───────────────────────── lookup ────────────────────────────────────── //

#[no_mangle]
pub extern "C" fn ndn_contains(
    h: NdnHandle,
    key_ptr: *const u8,
    key_len: usize,
    out_found: *mut bool,
) -> ErrorCode {
    if out_found.is_null() { return fail(ErrorCode::InvalidHandle); }
    let index = match unsafe { h.as_ref() } { Some(t) => t, None => return fail(ErrorCode::InvalidHandle) };
    let key = try_c!(key_slice(key_ptr, key_len));
    unsafe { *out_found = index.contains(key); }
    ErrorCode::Success
}

#[no_mangle]
pub extern "C" fn ndn_contains_and_upgrade(
    h: NdnHandle,
    key_ptr: *const u8,
    key_len: usize,
    dst_port: c_int,
    out_found: *mut bool,
) -> ErrorCode {
    if out_found.is_null() { return fail(ErrorCode::InvalidHandle); }
    let index = match unsafe { h.as_ref() } { Some(t) => t, None => return fail(ErrorCode::InvalidHandle) };
    let key = try_c!(key_slice(key_ptr, key_len));
    let found = match try_c!(port(dst_port)) {
        Some(p) => index.contains_and_upgrade(key, p),
        None => index.contains(key),
    };
    unsafe { *out_found = found; }
    ErrorCode::Success
}

/// Destination port of a terminal prefix, `-1` when the prefix is stored but
/// not terminal.
#[no_mangle]
pub extern "C" fn ndn_dst_port(
    h: NdnHandle,
    key_ptr: *const u8,
    key_len: usize,
    out_port: *mut c_int,
) -> ErrorCode {
    if out_port.is_null() { return fail(ErrorCode::InvalidHandle); }
    let index = match unsafe { h.as_ref() } { Some(t) => t, None => return fail(ErrorCode::InvalidHandle) };
    let key = try_c!(key_slice(key_ptr, key_len));
    match index.get(key) {
        Some(rec) => unsafe {
            *out_port = rec.dst_port.map_or(-1, |p| p.get() as c_int);
            ErrorCode::Success
        },
        None => fail(ErrorCode::NotFound),
    }
}

// ───────────────────── capacity & maintenance ────────────────────────── //

#[no_mangle]
pub extern "C" fn ndn_log_used(h: NdnHandle, out: *mut u64) -> ErrorCode {
    if out.is_null() {
        return fail(ErrorCode::InvalidHandle);
    }
    unsafe { h.as_ref() }
        .map(|t| { unsafe { *out = t.log_used() };  ErrorCode::Success })
        .unwrap_or_else(|| fail(ErrorCode::InvalidHandle))
}

#[no_mangle]
pub extern "C" fn ndn_len(h: NdnHandle, out: *mut u64) -> ErrorCode {
    if out.is_null() {
        return fail(ErrorCode::InvalidHandle);
    }
    unsafe { h.as_ref() }
        .map(|t| { unsafe { *out = t.len() as u64 };  ErrorCode::Success })
        .unwrap_or_else(|| fail(ErrorCode::InvalidHandle))
}

#[no_mangle]
pub extern "C" fn ndn_force_destroy(name_utf8: *const c_char) -> ErrorCode {
    let name = try_c!(cstr(name_utf8));
    HashIndex::destroy(name);
    ErrorCode::Success
}
