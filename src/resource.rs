//! Resource handles
//!
//! A handle owns exactly one engine pointer plus the release entry point
//! that returns it to the arena. Release runs at most once no matter how
//! many times it is requested, and drop releases whatever is still held.
//! Documents and compiled expressions are the two owners in this crate.

pub type ReleaseFn = fn(u32);

pub struct ResourceHandle {
    ptr: u32,
    release: ReleaseFn,
}

impl ResourceHandle {
    /// Take ownership of `ptr`. A zero pointer is legal and makes every
    /// later call a no-op.
    pub fn acquire(ptr: u32, release: ReleaseFn) -> Self {
        ResourceHandle { ptr, release }
    }

    /// The held pointer; zero once released.
    pub fn pointer(&self) -> u32 {
        self.ptr
    }

    /// Run the release function if the pointer is still live, then zero it.
    pub fn release(&mut self) {
        if self.ptr != 0 {
            (self.release)(self.ptr);
            self.ptr = 0;
        }
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("ptr", &self.ptr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static EXPLICIT_RELEASES: AtomicUsize = AtomicUsize::new(0);
    static DROP_RELEASES: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn test_release_runs_at_most_once() {
        fn bump(_ptr: u32) {
            EXPLICIT_RELEASES.fetch_add(1, Ordering::SeqCst);
        }
        let before = EXPLICIT_RELEASES.load(Ordering::SeqCst);
        let mut handle = ResourceHandle::acquire(17, bump);
        assert_eq!(handle.pointer(), 17);
        handle.release();
        assert_eq!(handle.pointer(), 0);
        handle.release();
        drop(handle);
        assert_eq!(EXPLICIT_RELEASES.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn test_drop_releases_live_pointer() {
        fn bump(_ptr: u32) {
            DROP_RELEASES.fetch_add(1, Ordering::SeqCst);
        }
        let before = DROP_RELEASES.load(Ordering::SeqCst);
        {
            let _handle = ResourceHandle::acquire(5, bump);
        }
        assert_eq!(DROP_RELEASES.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn test_zero_pointer_never_releases() {
        fn forbid(_ptr: u32) {
            panic!("release of a null handle");
        }
        let mut handle = ResourceHandle::acquire(0, forbid);
        handle.release();
        drop(handle);
    }
}
