//! Dynamic library loading for the Rust and C++ executors.
//!
//! Thin wrapper over `dlopen`/`dlsym`/`dlerror`. Handles stay open for
//! the life of the process: block libraries are cached by path and never
//! unloaded while values produced by them may still be alive.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use thiserror::Error;

/// Library loading errors.
#[derive(Debug, Error)]
pub enum DylibError {
    /// `dlopen` failed.
    #[error("cannot load library {path}: {reason}")]
    LoadFailed {
        /// Library path.
        path: String,
        /// `dlerror` text.
        reason: String,
    },

    /// `dlsym` failed.
    #[error("symbol '{symbol}' not found in {library}: {reason}")]
    SymbolNotFound {
        /// Symbol name.
        symbol: String,
        /// Library path.
        library: String,
        /// `dlerror` text.
        reason: String,
    },

    /// Path contained an interior NUL byte.
    #[error("invalid library path: {0}")]
    InvalidPath(String),
}

/// An open dynamic library.
#[derive(Debug)]
pub struct Library {
    handle: *mut c_void,
    path: String,
}

// SAFETY: a dlopen handle is process-global; dlsym on it is thread-safe.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    /// Load a shared object with `RTLD_NOW | RTLD_LOCAL`.
    pub fn open(path: &str) -> Result<Self, DylibError> {
        let c_path =
            CString::new(path).map_err(|_| DylibError::InvalidPath(path.to_string()))?;
        // SAFETY: c_path is a valid NUL-terminated string.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(DylibError::LoadFailed {
                path: path.to_string(),
                reason: last_dl_error(),
            });
        }
        Ok(Self {
            handle,
            path: path.to_string(),
        })
    }

    /// The path the library was loaded from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolve a symbol as a raw pointer.
    pub fn symbol(&self, name: &str) -> Result<*mut c_void, DylibError> {
        let c_name = CString::new(name).map_err(|_| DylibError::SymbolNotFound {
            symbol: name.to_string(),
            library: self.path.clone(),
            reason: "symbol name contains NUL".to_string(),
        })?;
        // SAFETY: handle is a live dlopen handle; c_name is NUL-terminated.
        unsafe { libc::dlerror() }; // clear any stale error
        let ptr = unsafe { libc::dlsym(self.handle, c_name.as_ptr()) };
        if ptr.is_null() {
            return Err(DylibError::SymbolNotFound {
                symbol: name.to_string(),
                library: self.path.clone(),
                reason: last_dl_error(),
            });
        }
        Ok(ptr)
    }

    /// Resolve a symbol as a typed function pointer.
    ///
    /// # Safety
    /// The caller must guarantee `T` matches the symbol's actual
    /// signature and that the library stays loaded while `T` is used —
    /// which holds here because libraries are never closed.
    pub unsafe fn function<T: Copy>(&self, name: &str) -> Result<T, DylibError> {
        let ptr = self.symbol(name)?;
        debug_assert_eq!(std::mem::size_of::<T>(), std::mem::size_of::<*mut c_void>());
        Ok(std::mem::transmute_copy(&ptr))
    }
}

fn last_dl_error() -> String {
    // SAFETY: dlerror returns null or a NUL-terminated static string.
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        return "unknown dlopen error".to_string();
    }
    unsafe { CStr::from_ptr(err as *const c_char) }
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_reports_path() {
        let err = Library::open("/nonexistent/libnaab-missing.so").unwrap_err();
        match err {
            DylibError::LoadFailed { path, .. } => {
                assert!(path.contains("libnaab-missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_nul_in_path_is_rejected() {
        assert!(matches!(
            Library::open("bad\0path"),
            Err(DylibError::InvalidPath(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_open_libc_and_resolve_symbol() {
        // libc is always loadable; a bogus symbol must name the library.
        let lib = Library::open("libc.so.6").unwrap();
        assert!(lib.symbol("strlen").is_ok());
        let err = lib.symbol("naab_no_such_symbol").unwrap_err();
        assert!(err.to_string().contains("naab_no_such_symbol"));
    }
}
