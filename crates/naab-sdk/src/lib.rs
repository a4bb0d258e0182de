//! NAAb SDK - Lightweight SDK for writing Rust block libraries
//!
//! This crate provides the C-ABI value type exchanged between the NAAb
//! runtime and Rust block libraries, without depending on the full
//! naab-engine. A block library is an ordinary `cdylib` exporting one
//! function per block:
//!
//! ```ignore
//! use naab_sdk::{BlockArgs, NaabValue, OwnedValue};
//!
//! #[no_mangle]
//! pub unsafe extern "C" fn double_it(
//!     args: *mut *mut NaabValue,
//!     arg_count: usize,
//! ) -> *mut NaabValue {
//!     let args = BlockArgs::from_raw(args, arg_count);
//!     match args.int(0) {
//!         Some(n) => OwnedValue::int(n * 2).into_raw(),
//!         None => {
//!             naab_sdk::set_last_error("double_it: expected an int argument");
//!             std::ptr::null_mut()
//!         }
//!     }
//! }
//! ```
//!
//! The runtime addresses the function as
//! `rust:///absolute/path/to/libblocks.so::double_it`.

#![warn(missing_docs)]

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

pub mod value;

pub use value::{BlockArgs, OwnedValue};

// ============================================================================
// C-ABI Value
// ============================================================================

/// Discriminant for [`NaabValue`].
///
/// The numeric values are part of the ABI and must never be reordered.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaabValueKind {
    /// Null / no value
    Null = 0,
    /// 64-bit signed integer
    Int = 1,
    /// IEEE-754 double
    Float = 2,
    /// Boolean
    Bool = 3,
    /// NUL-terminated UTF-8 string
    String = 4,
}

/// C-ABI value handle passed across the block boundary.
///
/// Primitive payloads are stored inline in `data`; strings are stored as an
/// owned `CString` pointer. Handles are created with the `naab_value_*`
/// constructors and released with [`naab_value_free`]. Every handle is
/// owned exclusively by whoever currently holds the pointer: the runtime
/// frees argument handles after the call, and frees the returned handle
/// after converting it.
#[repr(C)]
pub struct NaabValue {
    tag: NaabValueKind,
    data: u64,
}

/// Block entry-point signature.
///
/// `args` points at `arg_count` argument handles. The function returns an
/// owned handle, or null to signal failure (see [`naab_last_error`]).
pub type NaabBlockFn =
    unsafe extern "C" fn(args: *mut *mut NaabValue, arg_count: usize) -> *mut NaabValue;

impl NaabValue {
    fn boxed(tag: NaabValueKind, data: u64) -> *mut NaabValue {
        Box::into_raw(Box::new(NaabValue { tag, data }))
    }

    /// The discriminant of this handle.
    pub fn kind(&self) -> NaabValueKind {
        self.tag
    }
}

// ============================================================================
// Constructors
// ============================================================================

/// Create a null handle.
#[no_mangle]
pub extern "C" fn naab_value_null() -> *mut NaabValue {
    NaabValue::boxed(NaabValueKind::Null, 0)
}

/// Create an integer handle.
#[no_mangle]
pub extern "C" fn naab_value_int(value: i64) -> *mut NaabValue {
    NaabValue::boxed(NaabValueKind::Int, value as u64)
}

/// Create a float handle.
#[no_mangle]
pub extern "C" fn naab_value_float(value: f64) -> *mut NaabValue {
    NaabValue::boxed(NaabValueKind::Float, value.to_bits())
}

/// Create a boolean handle.
#[no_mangle]
pub extern "C" fn naab_value_bool(value: bool) -> *mut NaabValue {
    NaabValue::boxed(NaabValueKind::Bool, value as u64)
}

/// Create a string handle by copying a NUL-terminated UTF-8 string.
///
/// Returns null if `value` is null or contains interior NUL bytes.
///
/// # Safety
/// `value` must be a valid NUL-terminated string or null.
#[no_mangle]
pub unsafe extern "C" fn naab_value_string(value: *const c_char) -> *mut NaabValue {
    if value.is_null() {
        return std::ptr::null_mut();
    }
    let bytes = CStr::from_ptr(value).to_bytes();
    match CString::new(bytes) {
        Ok(owned) => NaabValue::boxed(NaabValueKind::String, owned.into_raw() as u64),
        Err(_) => std::ptr::null_mut(),
    }
}

// ============================================================================
// Accessors
// ============================================================================

/// Read the discriminant of a handle. Null pointers read as `Null`.
///
/// # Safety
/// `value` must be null or a live handle from a `naab_value_*` constructor.
#[no_mangle]
pub unsafe extern "C" fn naab_value_tag(value: *const NaabValue) -> NaabValueKind {
    if value.is_null() {
        return NaabValueKind::Null;
    }
    (*value).tag
}

/// Read an integer payload. Returns 0 for non-int handles.
///
/// # Safety
/// `value` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn naab_value_as_int(value: *const NaabValue) -> i64 {
    if value.is_null() || (*value).tag != NaabValueKind::Int {
        return 0;
    }
    (*value).data as i64
}

/// Read a float payload. Returns 0.0 for non-float handles.
///
/// # Safety
/// `value` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn naab_value_as_float(value: *const NaabValue) -> f64 {
    if value.is_null() || (*value).tag != NaabValueKind::Float {
        return 0.0;
    }
    f64::from_bits((*value).data)
}

/// Read a boolean payload. Returns false for non-bool handles.
///
/// # Safety
/// `value` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn naab_value_as_bool(value: *const NaabValue) -> bool {
    if value.is_null() || (*value).tag != NaabValueKind::Bool {
        return false;
    }
    (*value).data != 0
}

/// Borrow a string payload. Returns null for non-string handles.
///
/// The returned pointer stays valid until the handle is freed.
///
/// # Safety
/// `value` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn naab_value_as_string(value: *const NaabValue) -> *const c_char {
    if value.is_null() || (*value).tag != NaabValueKind::String {
        return std::ptr::null();
    }
    (*value).data as *const c_char
}

// ============================================================================
// Memory management
// ============================================================================

/// Free a handle created by a `naab_value_*` constructor.
///
/// Safe to call with null. Must not be called twice for the same handle.
///
/// # Safety
/// `value` must be null or a live handle that has not been freed.
#[no_mangle]
pub unsafe extern "C" fn naab_value_free(value: *mut NaabValue) {
    if value.is_null() {
        return;
    }
    let boxed = Box::from_raw(value);
    if boxed.tag == NaabValueKind::String && boxed.data != 0 {
        drop(CString::from_raw(boxed.data as *mut c_char));
    }
}

// ============================================================================
// Error reporting
// ============================================================================

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Record an error message for the current thread.
///
/// Block functions call this before returning null so the runtime can
/// attach a message to the failure.
pub fn set_last_error(message: &str) {
    let owned = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(owned));
}

/// Read and clear the last error recorded on the current thread.
pub fn take_last_error() -> Option<String> {
    LAST_ERROR.with(|slot| {
        slot.borrow_mut()
            .take()
            .map(|s| s.to_string_lossy().into_owned())
    })
}

/// Borrow the last error recorded on this thread, or null if none.
///
/// The pointer is invalidated by the next [`set_last_error`] call on the
/// same thread.
#[no_mangle]
pub extern "C" fn naab_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| match &*slot.borrow() {
        Some(msg) => msg.as_ptr(),
        None => std::ptr::null(),
    })
}

/// Clear the last error recorded on this thread.
#[no_mangle]
pub extern "C" fn naab_clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_round_trip() {
        unsafe {
            let v = naab_value_int(42);
            assert_eq!(naab_value_tag(v), NaabValueKind::Int);
            assert_eq!(naab_value_as_int(v), 42);
            naab_value_free(v);

            let v = naab_value_float(2.5);
            assert_eq!(naab_value_tag(v), NaabValueKind::Float);
            assert_eq!(naab_value_as_float(v), 2.5);
            naab_value_free(v);

            let v = naab_value_bool(true);
            assert!(naab_value_as_bool(v));
            naab_value_free(v);
        }
    }

    #[test]
    fn test_string_round_trip() {
        unsafe {
            let src = CString::new("hello").unwrap();
            let v = naab_value_string(src.as_ptr());
            assert_eq!(naab_value_tag(v), NaabValueKind::String);
            let read = CStr::from_ptr(naab_value_as_string(v));
            assert_eq!(read.to_str().unwrap(), "hello");
            naab_value_free(v);
        }
    }

    #[test]
    fn test_mismatched_accessor_defaults() {
        unsafe {
            let v = naab_value_bool(true);
            assert_eq!(naab_value_as_int(v), 0);
            assert_eq!(naab_value_as_float(v), 0.0);
            assert!(naab_value_as_string(v).is_null());
            naab_value_free(v);
        }
    }

    #[test]
    fn test_null_pointer_is_safe() {
        unsafe {
            assert_eq!(naab_value_tag(std::ptr::null()), NaabValueKind::Null);
            assert_eq!(naab_value_as_int(std::ptr::null()), 0);
            naab_value_free(std::ptr::null_mut());
        }
    }

    #[test]
    fn test_last_error_slot() {
        naab_clear_last_error();
        assert!(take_last_error().is_none());
        set_last_error("boom");
        assert_eq!(take_last_error().as_deref(), Some("boom"));
        assert!(take_last_error().is_none());
    }
}
