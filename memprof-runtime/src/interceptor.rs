//! `#[global_allocator]`-compatible wrapper that records every allocation
//! and deallocation through the reentrancy guard (spec §4.D).

use std::alloc::{GlobalAlloc, Layout};
use std::cell::{Cell, RefCell};

thread_local! {
    static IN_RECORDER: Cell<bool> = const { Cell::new(false) };
    static SITE: RefCell<Option<SiteInfo>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SiteInfo {
    pub file: Option<String>,
    pub line: u32,
    pub ty: Option<String>,
    pub is_array: bool,
}

/// Stash call-site metadata for the next allocation made by this thread.
/// Consumed (and cleared) by the very next `alloc`/`alloc_zeroed` this
/// thread performs; stale entries never leak into unrelated allocations
/// because `take_site` always clears the slot.
pub fn set_site(file: Option<&'static str>, line: u32, ty: Option<&'static str>, is_array: bool) {
    SITE.with(|s| {
        *s.borrow_mut() = Some(SiteInfo {
            file: file.map(str::to_owned),
            line,
            ty: ty.map(str::to_owned),
            is_array,
        });
    });
}

fn take_site() -> Option<SiteInfo> {
    SITE.with(|s| s.borrow_mut().take())
}

/// RAII reentrancy guard: held only while this thread is inside recording
/// code, so that allocations made by the Registry/Sender themselves (a
/// `HashMap` insert, a `Vec` push) are never recorded and never recurse.
///
/// `pub(crate)` so `api::record_alloc`/`api::record_free` — the public
/// FFI-style entry points that call into the registry without going
/// through the allocator hook — can raise it too (spec §4.D).
pub(crate) struct ReentrancyGuard;

impl ReentrancyGuard {
    pub(crate) fn enter() -> Option<Self> {
        let already_in = IN_RECORDER.with(|f| f.replace(true));
        if already_in {
            None
        } else {
            Some(ReentrancyGuard)
        }
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        IN_RECORDER.with(|f| f.set(false));
    }
}

/// Wraps any [`GlobalAlloc`] and forwards every successful alloc/dealloc to
/// the runtime's recording API (spec §4.D, §4.F).
pub struct TrackingAllocator<A> {
    inner: A,
}

impl<A> TrackingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        if !ptr.is_null() {
            record_alloc(ptr as u64, layout.size() as u64);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc_zeroed(layout);
        if !ptr.is_null() {
            record_alloc(ptr as u64, layout.size() as u64);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        record_free(ptr as u64, layout.size() as u64);
        self.inner.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        record_free(ptr as u64, layout.size() as u64);
        let new_ptr = self.inner.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            record_alloc(new_ptr as u64, new_size as u64);
        }
        new_ptr
    }
}

fn record_alloc(ptr: u64, size: u64) {
    let Some(_guard) = ReentrancyGuard::enter() else { return };
    let site = take_site();
    crate::api::on_alloc(ptr, size, site);
}

fn record_free(ptr: u64, hinted_size: u64) {
    let Some(_guard) = ReentrancyGuard::enter() else { return };
    let _ = take_site(); // a free never carries a pending site; drop it defensively
    crate::api::on_free(ptr, hinted_size);
}

/// Capture `file!()`/`line!()` around an allocating expression, recorded
/// as a scalar allocation of the given type.
#[macro_export]
macro_rules! mprof_alloc {
    ($ty:ty, $expr:expr) => {{
        $crate::interceptor::set_site(Some(file!()), line!(), Some(stringify!($ty)), false);
        $expr
    }};
}

/// Same as [`mprof_alloc!`] but tags the call site as an array allocation.
#[macro_export]
macro_rules! mprof_alloc_array {
    ($ty:ty, $expr:expr) => {{
        $crate::interceptor::set_site(Some(file!()), line!(), Some(stringify!($ty)), true);
        $expr
    }};
}
