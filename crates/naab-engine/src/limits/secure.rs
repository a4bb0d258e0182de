//! Zero-on-drop container for secrets (HMAC keys, credentials).

use std::fmt;
use std::sync::atomic::{compiler_fence, Ordering};

/// A byte container whose contents are overwritten before the allocation
/// is returned.
///
/// The wipe uses volatile writes followed by a compiler fence so the
/// optimizer cannot elide the "dead" stores to a buffer that is about to
/// be freed.
pub struct SecureString {
    bytes: Vec<u8>,
}

impl SecureString {
    /// Take ownership of `secret`.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: secret.into(),
        }
    }

    /// Borrow the secret bytes.
    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

/// Volatile byte-wise wipe that the optimizer must not elide.
fn wipe(bytes: &mut [u8]) {
    let ptr = bytes.as_mut_ptr();
    for i in 0..bytes.len() {
        // SAFETY: i is in bounds of the live allocation.
        unsafe { std::ptr::write_volatile(ptr.add(i), 0) };
    }
    compiler_fence(Ordering::SeqCst);
}

impl Drop for SecureString {
    fn drop(&mut self) {
        wipe(&mut self.bytes);
    }
}

// Never print secret contents, even through `{:?}`.
impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString({} bytes)", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expose_round_trip() {
        let s = SecureString::from("hunter2");
        assert_eq!(s.expose(), b"hunter2");
        assert_eq!(s.len(), 7);
        assert!(!s.is_empty());
    }

    #[test]
    fn test_debug_is_redacted() {
        let s = SecureString::from("topsecret");
        let shown = format!("{s:?}");
        assert!(!shown.contains("topsecret"));
        assert!(shown.contains("9 bytes"));
    }

    #[test]
    fn test_wipe_zeroes_in_place() {
        let mut buf = b"wipe-me".to_vec();
        wipe(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(buf.len(), 7);
    }
}
