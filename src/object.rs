//! # Object Header & Lifecycle
//!
//! The boxed-object lifecycle state machine and its atomic operations.
//!
//! Every boxed object is one heap block holding an [`ObjectHeader`]
//! immediately followed by the payload. An [`ObjectPtr`] handle addresses
//! the payload; the header sits at a fixed offset before it. All lifecycle
//! operations mutate only the header's three atomic fields, so objects may
//! be retained, released and weak-pinned concurrently from any number of
//! threads without locks.
//!
//! ## Destruction protocol
//!
//! Destruction is two-phase. When the strong count reaches zero the object
//! is *finalized*: a single compare-and-swap moves the state from `ALIVE`
//! to `FINALIZING`, the winner runs the payload destructor, then stores
//! `FINALIZED`. The backing memory is *freed* separately, once both counts
//! have independently reached zero, behind a second compare-and-swap
//! (`FINALIZED` to `FREED`) so that racing release paths free exactly once.
//!
//! The transient `FINALIZING` state exists for reentrancy: a destructor may
//! release other objects whose own destructors release references back to
//! the object being finalized. Those reentrant releases observe a state
//! other than `ALIVE` (so the destructor never runs twice) and their free
//! attempt fails the `FINALIZED` compare-and-swap (so memory is not freed
//! under the outer destructor call). The call that originally observed the
//! zero crossing retries the free after the destructor returns.

use std::alloc::{self, Layout};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::typeinfo::TypeInfo;

/// Lifecycle states stored in the header's `state` field.
///
/// Transitions are monotonic: `ALIVE` to `FINALIZING` to `FINALIZED` to
/// `FREED`, never backwards.
mod state {
    /// Payload constructed and usable.
    pub const ALIVE: u32 = 0;
    /// Payload destructor currently executing.
    pub const FINALIZING: u32 = 1;
    /// Destructor finished; memory not yet freed.
    pub const FINALIZED: u32 = 2;
    /// Backing memory released.
    pub const FREED: u32 = 3;
}

/// Per-object metadata, placed immediately before the payload.
#[repr(C)]
struct ObjectHeader {
    /// Immutable descriptor of the payload type.
    type_info: TypeInfo,
    /// Strong reference count. The payload is live while > 0.
    strong: AtomicI32,
    /// Weak reference count.
    weak: AtomicI32,
    /// Lifecycle state, see [`state`].
    state: AtomicU32,
}

impl ObjectHeader {
    /// Bytes reserved before the payload for a payload alignment of
    /// `align`: the smallest multiple of the effective block alignment
    /// that can hold the header.
    fn padding(align: usize) -> usize {
        let align = align.max(mem::align_of::<ObjectHeader>());
        let header = mem::size_of::<ObjectHeader>();
        header.div_ceil(align) * align
    }

    /// Layout of the whole block (header padding + payload).
    fn block_layout(type_info: TypeInfo) -> Layout {
        let align = type_info.alignment().max(mem::align_of::<ObjectHeader>());
        let size = Self::padding(type_info.alignment()) + type_info.size();
        // Alignment was validated as a power of two at registration.
        Layout::from_size_align(size, align).expect("object layout overflow")
    }
}

/// Opaque handle to a boxed object's payload.
///
/// `ObjectPtr` is plain data: copying it carries no ownership and touches
/// no reference counts. A null handle is the allocation-failure sentinel
/// and the empty state of the typeless wrappers.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectPtr(*mut u8);

// The handle itself is an address; every safe operation on it is count
// traffic backed by atomics, and payload access already requires unsafe.
unsafe impl Send for ObjectPtr {}
unsafe impl Sync for ObjectPtr {}

impl ObjectPtr {
    /// The null handle.
    pub const fn null() -> ObjectPtr {
        ObjectPtr(std::ptr::null_mut())
    }

    /// Wraps a raw payload address.
    pub const fn from_raw(raw: *mut u8) -> ObjectPtr {
        ObjectPtr(raw)
    }

    /// The raw payload address.
    pub const fn as_raw(self) -> *mut u8 {
        self.0
    }

    /// Checks for the null handle.
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// The payload address as a typed pointer.
    ///
    /// No check is performed that the payload actually is a `T`; use
    /// [`object_is_type`] or [`query_interface`](crate::query_interface)
    /// for checked casts.
    pub const fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl fmt::Debug for ObjectPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectPtr({:#x})", self.0 as usize)
    }
}

/// Resolves the header preceding a payload handle.
///
/// # Safety
///
/// `ptr` must be a non-null handle returned by [`object_alloc`] whose
/// memory has not been freed.
unsafe fn header<'a>(ptr: ObjectPtr) -> &'a ObjectHeader {
    debug_assert!(!ptr.is_null());
    &*(ptr.as_raw().sub(mem::size_of::<ObjectHeader>()) as *const ObjectHeader)
}

/// Allocates one boxed object of the given type.
///
/// The returned object has `strong = 1`, `weak = 0` and is `ALIVE`. The
/// payload is *not* initialized; the caller must construct a value of the
/// registered type in it before the object is released or used.
///
/// Returns the null handle if the underlying allocator fails.
pub fn object_alloc(type_info: TypeInfo) -> ObjectPtr {
    let layout = ObjectHeader::block_layout(type_info);
    let padding = ObjectHeader::padding(type_info.alignment());
    // Layout size is always non-zero: it includes the header padding.
    let block = unsafe { alloc::alloc(layout) };
    if block.is_null() {
        return ObjectPtr::null();
    }
    let ptr = ObjectPtr::from_raw(unsafe { block.add(padding) });
    let hdr = ptr.as_raw() as usize - mem::size_of::<ObjectHeader>();
    unsafe {
        std::ptr::write(
            hdr as *mut ObjectHeader,
            ObjectHeader {
                type_info,
                strong: AtomicI32::new(1),
                weak: AtomicI32::new(0),
                state: AtomicU32::new(state::ALIVE),
            },
        );
    }
    #[cfg(feature = "leak-track")]
    leak_track::register(ptr);
    tracing::trace!(object = ?ptr, ty = type_info.name(), "allocated boxed object");
    ptr
}

/// Increments the strong reference count.
///
/// Returns the strong count after the operation. Retaining an object whose
/// strong count has already reached zero is a contract violation.
///
/// # Safety
///
/// `ptr` must be a valid, not-yet-freed handle from [`object_alloc`].
pub unsafe fn object_retain(ptr: ObjectPtr) -> i32 {
    let old = header(ptr).strong.fetch_add(1, Ordering::SeqCst);
    debug_assert!(old > 0, "object_retain on a dead object");
    old + 1
}

/// Decrements the strong reference count, finalizing the object when it
/// reaches zero and freeing the memory once the weak count is also zero.
///
/// Returns the strong count after the operation.
///
/// # Safety
///
/// `ptr` must be a valid handle from [`object_alloc`] holding at least one
/// strong reference owned by the caller, with an initialized payload.
pub unsafe fn object_release(ptr: ObjectPtr) -> i32 {
    let hdr = header(ptr);
    let old = hdr.strong.fetch_sub(1, Ordering::SeqCst);
    debug_assert!(old > 0, "object_release underflow");
    let count = old - 1;
    if count == 0 {
        expire(ptr);
        // Re-check after the destructor returned: the destructor may have
        // released weak references through back-pointers.
        if header(ptr).weak.load(Ordering::SeqCst) == 0 {
            destroy(ptr);
        }
    }
    count
}

/// Reads the current strong reference count.
///
/// # Safety
///
/// `ptr` must be a valid, not-yet-freed handle from [`object_alloc`].
pub unsafe fn object_ref_count(ptr: ObjectPtr) -> i32 {
    header(ptr).strong.load(Ordering::SeqCst)
}

/// Increments the weak reference count.
///
/// Returns the weak count after the operation.
///
/// # Safety
///
/// `ptr` must be a valid, not-yet-freed handle from [`object_alloc`].
pub unsafe fn object_retain_weak(ptr: ObjectPtr) -> i32 {
    let old = header(ptr).weak.fetch_add(1, Ordering::SeqCst);
    debug_assert!(old >= 0, "object_retain_weak underflow");
    old + 1
}

/// Decrements the weak reference count, freeing the memory if the strong
/// count is also zero.
///
/// Returns the weak count after the operation.
///
/// # Safety
///
/// `ptr` must be a valid handle from [`object_alloc`] holding at least one
/// weak reference owned by the caller.
pub unsafe fn object_release_weak(ptr: ObjectPtr) -> i32 {
    let hdr = header(ptr);
    let old = hdr.weak.fetch_sub(1, Ordering::SeqCst);
    debug_assert!(old > 0, "object_release_weak underflow");
    let count = old - 1;
    if count == 0 && hdr.strong.load(Ordering::SeqCst) == 0 {
        destroy(ptr);
    }
    count
}

/// Reads the current weak reference count.
///
/// # Safety
///
/// `ptr` must be a valid, not-yet-freed handle from [`object_alloc`].
pub unsafe fn object_weak_ref_count(ptr: ObjectPtr) -> i32 {
    header(ptr).weak.load(Ordering::SeqCst)
}

/// Checks whether the object has expired (its destructor has started or
/// finished).
///
/// An object expires when its strong count reaches zero; the memory may
/// outlive expiry while weak references remain.
///
/// # Safety
///
/// `ptr` must be a valid, not-yet-freed handle from [`object_alloc`].
pub unsafe fn object_expired(ptr: ObjectPtr) -> bool {
    header(ptr).state.load(Ordering::SeqCst) != state::ALIVE
}

/// Increments the strong count iff the object has not expired.
///
/// This is the only operation that may resurrect a strong reference from a
/// weak one. It never succeeds once a concurrent release has driven the
/// strong count to zero, and never fails while the strong count is
/// positive.
///
/// # Safety
///
/// `ptr` must be a valid, not-yet-freed handle from [`object_alloc`].
pub unsafe fn object_retain_if_not_expired(ptr: ObjectPtr) -> bool {
    let strong = &header(ptr).strong;
    let mut current = strong.load(Ordering::SeqCst);
    loop {
        if current == 0 {
            return false;
        }
        match strong.compare_exchange_weak(
            current,
            current + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
}

/// Returns the type of the boxed object.
///
/// # Safety
///
/// `ptr` must be a valid, not-yet-freed handle from [`object_alloc`].
pub unsafe fn object_type(ptr: ObjectPtr) -> TypeInfo {
    header(ptr).type_info
}

/// Checks whether the boxed object is the given type or a derived type.
///
/// # Safety
///
/// `ptr` must be a valid, not-yet-freed handle from [`object_alloc`].
pub unsafe fn object_is_type(ptr: ObjectPtr, type_info: TypeInfo) -> bool {
    object_type(ptr).is(type_info)
}

/// Runs the payload destructor at most once.
///
/// Only the caller winning the `ALIVE` to `FINALIZING` compare-and-swap
/// runs the destructor; everyone else observes a non-`ALIVE` state and
/// returns immediately.
unsafe fn expire(ptr: ObjectPtr) {
    let hdr = header(ptr);
    if hdr
        .state
        .compare_exchange(
            state::ALIVE,
            state::FINALIZING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .is_ok()
    {
        tracing::trace!(object = ?ptr, ty = hdr.type_info.name(), "finalizing boxed object");
        if let Some(drop_fn) = hdr.type_info.drop_fn() {
            // Reentrant releases triggered from here observe FINALIZING:
            // they never re-run the destructor and never free the block.
            drop_fn(ptr.as_raw());
        }
        hdr.state.store(state::FINALIZED, Ordering::SeqCst);
    }
}

/// Frees the backing memory exactly once.
///
/// The `FINALIZED` to `FREED` compare-and-swap serializes racing
/// zero-observers from the strong- and weak-release paths, and defers the
/// free while the destructor is still running (`FINALIZING`).
unsafe fn destroy(ptr: ObjectPtr) {
    let hdr = header(ptr);
    if hdr
        .state
        .compare_exchange(
            state::FINALIZED,
            state::FREED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .is_err()
    {
        return;
    }
    let type_info = hdr.type_info;
    let layout = ObjectHeader::block_layout(type_info);
    let padding = ObjectHeader::padding(type_info.alignment());
    #[cfg(feature = "leak-track")]
    leak_track::unregister(ptr);
    tracing::trace!(object = ?ptr, ty = type_info.name(), "freeing boxed object");
    alloc::dealloc(ptr.as_raw().sub(padding), layout);
}

#[cfg(feature = "leak-track")]
mod leak_track {
    //! Global registry of live boxed objects, kept when the `leak-track`
    //! feature is enabled.

    use std::collections::HashSet;
    use std::sync::OnceLock;

    use parking_lot::Mutex;

    use super::{header, ObjectPtr};

    static LIVE: OnceLock<Mutex<HashSet<usize>>> = OnceLock::new();

    fn live() -> &'static Mutex<HashSet<usize>> {
        LIVE.get_or_init(|| Mutex::new(HashSet::new()))
    }

    pub(super) fn register(ptr: ObjectPtr) {
        live().lock().insert(ptr.as_raw() as usize);
    }

    pub(super) fn unregister(ptr: ObjectPtr) {
        live().lock().remove(&(ptr.as_raw() as usize));
    }

    /// Number of boxed objects currently alive or awaiting their final
    /// free.
    pub fn live_object_count() -> usize {
        live().lock().len()
    }

    /// Emits one `tracing` warning per live boxed object.
    ///
    /// Intended for shutdown paths: anything still tracked here when the
    /// process is done with the object runtime is a leak.
    pub fn report_leaks() -> usize {
        let live = live().lock();
        for &addr in live.iter() {
            let ptr = ObjectPtr::from_raw(addr as *mut u8);
            // Tracked objects are by definition not yet freed.
            let (name, strong, weak) = unsafe {
                let hdr = header(ptr);
                (
                    hdr.type_info.name(),
                    hdr.strong.load(std::sync::atomic::Ordering::SeqCst),
                    hdr.weak.load(std::sync::atomic::Ordering::SeqCst),
                )
            };
            tracing::warn!(
                object = ?ptr,
                ty = name,
                strong,
                weak,
                "leaked boxed object"
            );
        }
        live.len()
    }
}

#[cfg(feature = "leak-track")]
pub use leak_track::{live_object_count, report_leaks};
