//! Key/value option dictionaries passed to open and configure calls.

use std::ffi::{CStr, CString};
use std::ptr;

use ffmpeg_sys_next as ffi;

use crate::error::{check, Error, Result};

/// Owned wrapper over the native option dictionary.
///
/// Native open calls consume and rewrite the dictionary pointer in place;
/// [`Dictionary::as_mut_ptr`] exposes the slot for those calls and the
/// wrapper frees whatever remains.
#[derive(Default)]
pub struct Dictionary {
    raw: *mut ffi::AVDictionary,
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary { raw: ptr::null_mut() }
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let key = CString::new(key).map_err(|_| Error::Misuse("key contains NUL".into()))?;
        let value = CString::new(value).map_err(|_| Error::Misuse("value contains NUL".into()))?;
        check(
            unsafe { ffi::av_dict_set(&mut self.raw, key.as_ptr(), value.as_ptr(), 0) },
            "could not set dictionary entry",
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let key = CString::new(key).ok()?;
        unsafe {
            let entry = ffi::av_dict_get(self.raw, key.as_ptr(), ptr::null(), 0);
            if entry.is_null() {
                None
            } else {
                Some(CStr::from_ptr((*entry).value).to_string_lossy().into_owned())
            }
        }
    }

    pub fn len(&self) -> usize {
        unsafe { ffi::av_dict_count(self.raw) as usize }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut *mut ffi::AVDictionary {
        &mut self.raw
    }
}

impl Drop for Dictionary {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe { ffi::av_dict_free(&mut self.raw) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_round_trip() {
        let mut dict = Dictionary::new();
        assert!(dict.is_empty());
        dict.set("movflags", "faststart").unwrap();
        dict.set("preset", "fast").unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get("preset").as_deref(), Some("fast"));
        assert_eq!(dict.get("absent"), None);
    }

    #[test]
    fn overwrite_replaces_value() {
        let mut dict = Dictionary::new();
        dict.set("preset", "fast").unwrap();
        dict.set("preset", "slow").unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get("preset").as_deref(), Some("slow"));
    }
}
