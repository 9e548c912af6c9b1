//! Exclusive ownership of native pointers.
//!
//! FFmpeg hands out heap objects that must each be released through their own
//! free function, exactly once, in the right order. [`Owned`] pairs the
//! pointer with that function so a scope exit (including an early `?` return)
//! can never leak or double-free it.

use std::mem;
use std::ptr;

/// Move-only owner of a native pointer plus its destructor.
///
/// At most one `Owned` holds a given pointer; moving the value transfers
/// ownership, and [`release`](Owned::release) hands the raw pointer back to
/// the caller, leaving the handle empty. Dropping an empty handle is a no-op.
pub struct Owned<T> {
    ptr: *mut T,
    free: unsafe fn(*mut T),
}

impl<T> Owned<T> {
    /// Take ownership of `ptr`. `free` runs exactly once when the handle is
    /// dropped while still holding the pointer. A null `ptr` yields an empty
    /// handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for `free`, and nothing else may free it.
    pub unsafe fn acquire(ptr: *mut T, free: unsafe fn(*mut T)) -> Self {
        Owned { ptr, free }
    }

    /// Non-owning observation of the pointer.
    pub fn as_ptr(&self) -> *mut T {
        self.ptr
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Relinquish ownership: returns the raw pointer and empties the handle,
    /// so the destructor will not run.
    pub fn release(&mut self) -> *mut T {
        mem::replace(&mut self.ptr, ptr::null_mut())
    }
}

impl<T> Drop for Owned<T> {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { (self.free)(self.ptr) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FREED: AtomicUsize = AtomicUsize::new(0);

    unsafe fn counting_free(_: *mut u32) {
        FREED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn drop_frees_exactly_once() {
        FREED.store(0, Ordering::SeqCst);
        let mut value = 7u32;
        {
            let owned = unsafe { Owned::acquire(&mut value as *mut u32, counting_free) };
            assert!(!owned.is_null());
        }
        assert_eq!(FREED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_prevents_destruction() {
        FREED.store(0, Ordering::SeqCst);
        let mut value = 7u32;
        {
            let mut owned = unsafe { Owned::acquire(&mut value as *mut u32, counting_free) };
            let raw = owned.release();
            assert_eq!(raw, &mut value as *mut u32);
            assert!(owned.is_null());
        }
        assert_eq!(FREED.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_handle_drop_is_noop() {
        FREED.store(0, Ordering::SeqCst);
        drop(unsafe { Owned::<u32>::acquire(std::ptr::null_mut(), counting_free) });
        assert_eq!(FREED.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn move_transfers_ownership() {
        FREED.store(0, Ordering::SeqCst);
        let mut value = 7u32;
        let owned = unsafe { Owned::acquire(&mut value as *mut u32, counting_free) };
        let moved = owned;
        assert!(!moved.is_null());
        drop(moved);
        assert_eq!(FREED.load(Ordering::SeqCst), 1);
    }
}
