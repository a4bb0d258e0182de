//! Safe wrappers over the raw C-ABI handles for block authors.

use std::ffi::{CStr, CString};

use crate::{
    naab_value_bool, naab_value_float, naab_value_free, naab_value_int, naab_value_null,
    NaabValue, NaabValueKind,
};

/// An owned [`NaabValue`] handle with RAII cleanup.
///
/// Block authors build return values through this type and hand ownership
/// back to the runtime with [`OwnedValue::into_raw`].
pub struct OwnedValue {
    raw: *mut NaabValue,
}

impl OwnedValue {
    /// A null value.
    pub fn null() -> Self {
        Self { raw: naab_value_null() }
    }

    /// An integer value.
    pub fn int(v: i64) -> Self {
        Self { raw: naab_value_int(v) }
    }

    /// A float value.
    pub fn float(v: f64) -> Self {
        Self { raw: naab_value_float(v) }
    }

    /// A boolean value.
    pub fn bool(v: bool) -> Self {
        Self { raw: naab_value_bool(v) }
    }

    /// A string value. Interior NUL bytes are replaced with spaces.
    pub fn string(v: &str) -> Self {
        let c = CString::new(v.replace('\0', " ")).unwrap_or_default();
        // SAFETY: `c` is a valid NUL-terminated string for the duration of the call.
        let raw = unsafe { crate::naab_value_string(c.as_ptr()) };
        Self { raw }
    }

    /// Release ownership of the handle to the caller (typically the runtime).
    pub fn into_raw(self) -> *mut NaabValue {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }
}

impl Drop for OwnedValue {
    fn drop(&mut self) {
        // SAFETY: `raw` came from a constructor and has not been freed.
        unsafe { naab_value_free(self.raw) };
    }
}

/// Borrowed view of the argument array passed to a block function.
pub struct BlockArgs<'a> {
    args: &'a [*mut NaabValue],
}

impl<'a> BlockArgs<'a> {
    /// Wrap the raw argument array.
    ///
    /// # Safety
    /// `args` must point at `arg_count` live handles (or be null with
    /// `arg_count == 0`), and the handles must outlive the returned view.
    pub unsafe fn from_raw(args: *mut *mut NaabValue, arg_count: usize) -> Self {
        let args = if args.is_null() || arg_count == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(args, arg_count)
        };
        Self { args }
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// True when no arguments were passed.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// The discriminant of argument `index`, if present.
    pub fn kind(&self, index: usize) -> Option<NaabValueKind> {
        self.args
            .get(index)
            // SAFETY: handles in `args` are live per `from_raw`'s contract.
            .map(|&v| unsafe { crate::naab_value_tag(v) })
    }

    /// Argument `index` as an integer, if it is one.
    pub fn int(&self, index: usize) -> Option<i64> {
        match self.kind(index)? {
            // SAFETY: index checked by `kind`.
            NaabValueKind::Int => Some(unsafe { crate::naab_value_as_int(self.args[index]) }),
            _ => None,
        }
    }

    /// Argument `index` as a float. Integer arguments widen.
    pub fn float(&self, index: usize) -> Option<f64> {
        match self.kind(index)? {
            // SAFETY: index checked by `kind`.
            NaabValueKind::Float => Some(unsafe { crate::naab_value_as_float(self.args[index]) }),
            NaabValueKind::Int => Some(unsafe { crate::naab_value_as_int(self.args[index]) } as f64),
            _ => None,
        }
    }

    /// Argument `index` as a boolean, if it is one.
    pub fn bool(&self, index: usize) -> Option<bool> {
        match self.kind(index)? {
            // SAFETY: index checked by `kind`.
            NaabValueKind::Bool => Some(unsafe { crate::naab_value_as_bool(self.args[index]) }),
            _ => None,
        }
    }

    /// Argument `index` as a string, if it is one.
    pub fn string(&self, index: usize) -> Option<String> {
        match self.kind(index)? {
            NaabValueKind::String => {
                // SAFETY: index checked by `kind`; string payloads are valid
                // NUL-terminated allocations for the life of the handle.
                let ptr = unsafe { crate::naab_value_as_string(self.args[index]) };
                if ptr.is_null() {
                    return None;
                }
                Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
            }
            _ => None,
        }
    }
}
