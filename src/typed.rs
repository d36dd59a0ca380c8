//! # Typed References
//!
//! Strong ([`Ref`]) and weak ([`WeakRef`]) smart pointers carrying a
//! compile-time payload type.
//!
//! The wrapped type comes in two shapes, selected at compile time through
//! the [`Referent`] trait:
//!
//! - **Boxed-value shape** — a concrete type declared with
//!   [`boxed_type!`](crate::boxed_type): the stored pointer *is* the
//!   handle.
//! - **Capability shape** — a `dyn Trait` declared with
//!   [`interface!`](crate::interface): the stored pointer is a trait
//!   object whose data half is the handle; recovering the handle is a
//!   thin cast.
//!
//! Either way the wrappers never touch the object header directly: they
//! recover the handle and delegate to the typeless lifecycle operations.
//! Cross-shape conversions go through the interface registry and yield
//! `None` when the object lacks the requested capability.

use std::cell::Cell;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::guid::Guid;
use crate::object::{
    object_alloc, object_is_type, object_release, object_release_weak, object_retain,
    object_retain_if_not_expired, object_retain_weak, ObjectPtr,
};
use crate::typeinfo::{type_by_guid, type_of, BoxedType};

/// Types that can sit behind a typed reference.
///
/// Implemented by the [`boxed_type!`](crate::boxed_type) and
/// [`interface!`](crate::interface) macros; not meant to be implemented by
/// hand.
///
/// # Safety
///
/// `object_of` must return the handle of the boxed object `this` points
/// into, and `resolve` must return a pointer whose `object_of` round-trips
/// to the same handle. A resolved pointer must stay valid for as long as
/// the object's payload does.
pub unsafe trait Referent: 'static {
    /// The GUID driving dynamic casts to this shape: the type GUID for
    /// boxed values, the interface ID for capabilities.
    const CAST_ID: Guid;

    /// Recovers the boxed-object handle from a shaped pointer.
    fn object_of(this: NonNull<Self>) -> ObjectPtr;

    /// Reinterprets a handle as this shape.
    ///
    /// Returns `None` when the object is not of this type (boxed-value
    /// shape) or does not implement this interface (capability shape).
    /// Never touches reference counts.
    ///
    /// # Safety
    ///
    /// `obj` must be null or a valid, not-yet-freed handle.
    unsafe fn resolve(obj: ObjectPtr) -> Option<NonNull<Self>>;
}

/// Boxed-value shape resolution: a direct type match, honoring base-type
/// chains.
///
/// # Safety
///
/// `obj` must be null or a valid, not-yet-freed handle.
pub unsafe fn resolve_boxed<T: BoxedType>(obj: ObjectPtr) -> Option<NonNull<T>> {
    if obj.is_null() {
        return None;
    }
    let type_info = type_by_guid(T::GUID)?;
    if object_is_type(obj, type_info) {
        NonNull::new(obj.as_ptr::<T>())
    } else {
        None
    }
}

/// Declares a concrete type as a boxed type: implements
/// [`BoxedType`](crate::BoxedType) and the boxed-value [`Referent`] shape.
///
/// ```ignore
/// struct Sprite { /* ... */ }
/// opal_object::boxed_type!(Sprite = "0cda3041-5f4c-4f6e-9c31-9b4a0b36d2ab");
/// ```
///
/// The type still has to be registered once at startup with
/// [`register_boxed_type`](crate::register_boxed_type).
#[macro_export]
macro_rules! boxed_type {
    ($ty:ty = $guid:literal) => {
        unsafe impl $crate::BoxedType for $ty {
            const GUID: $crate::Guid = $crate::Guid::parse($guid);
            const NAME: &'static str = ::core::stringify!($ty);
        }
        unsafe impl $crate::Referent for $ty {
            const CAST_ID: $crate::Guid = <$ty as $crate::BoxedType>::GUID;
            fn object_of(this: ::core::ptr::NonNull<Self>) -> $crate::ObjectPtr {
                $crate::ObjectPtr::from_raw(this.as_ptr() as *mut u8)
            }
            unsafe fn resolve(
                obj: $crate::ObjectPtr,
            ) -> ::core::option::Option<::core::ptr::NonNull<Self>> {
                $crate::resolve_boxed::<$ty>(obj)
            }
        }
    };
}

/// Typed strong reference to a boxed object.
///
/// Always non-null: fallible constructions return `Option<Ref<T>>`. A
/// `Ref` owns one strong reference, released on drop.
pub struct Ref<T: ?Sized + Referent> {
    ptr: NonNull<T>,
}

impl<T: BoxedType + Referent> Ref<T> {
    /// Allocates a new boxed object holding `value`.
    ///
    /// The type must have been registered with
    /// [`register_boxed_type`](crate::register_boxed_type) beforehand;
    /// using an unregistered type is a contract violation. Aborts via
    /// [`std::alloc::handle_alloc_error`] if the allocator fails.
    pub fn new(value: T) -> Ref<T> {
        let type_info = type_of::<T>();
        let obj = object_alloc(type_info);
        if obj.is_null() {
            std::alloc::handle_alloc_error(std::alloc::Layout::new::<T>());
        }
        let ptr = obj.as_ptr::<T>();
        unsafe {
            std::ptr::write(ptr, value);
            Ref {
                ptr: NonNull::new_unchecked(ptr),
            }
        }
    }
}

impl<T: ?Sized + Referent> Ref<T> {
    /// The handle of the referenced object. No count traffic.
    pub fn object(&self) -> ObjectPtr {
        T::object_of(self.ptr)
    }

    /// Takes ownership of one strong reference the caller holds on `obj`,
    /// resolving it to this shape.
    ///
    /// On resolution failure the transferred reference is released (not
    /// leaked) and `None` is returned. Null handles yield `None` without
    /// any count traffic.
    ///
    /// # Safety
    ///
    /// `obj` must be null or a valid handle for which the caller owns one
    /// strong reference.
    pub unsafe fn attach(obj: ObjectPtr) -> Option<Ref<T>> {
        if obj.is_null() {
            return None;
        }
        match T::resolve(obj) {
            Some(ptr) => Some(Ref { ptr }),
            None => {
                object_release(obj);
                None
            }
        }
    }

    /// Resolves and retains `obj` into a new reference.
    ///
    /// # Safety
    ///
    /// `obj` must be null or a valid, unexpired, not-yet-freed handle.
    pub unsafe fn from_object(obj: ObjectPtr) -> Option<Ref<T>> {
        let ptr = T::resolve(obj)?;
        object_retain(obj);
        Some(Ref { ptr })
    }

    /// Clears the reference and returns the handle without releasing:
    /// ownership of the strong reference transfers to the caller.
    pub fn detach(self) -> ObjectPtr {
        let obj = self.object();
        mem::forget(self);
        obj
    }

    /// Reinterprets this reference as another shape, retaining on
    /// success.
    ///
    /// `None` when the object is not of type `U` / lacks capability `U`;
    /// this reference is unaffected either way.
    pub fn cast<U: ?Sized + Referent>(&self) -> Option<Ref<U>> {
        let obj = self.object();
        unsafe {
            let ptr = U::resolve(obj)?;
            object_retain(obj);
            Some(Ref { ptr })
        }
    }

    /// Reinterprets this reference as another shape, consuming it.
    ///
    /// On success the strong reference transfers without any count
    /// traffic; on failure it is released and `None` is returned.
    pub fn into_cast<U: ?Sized + Referent>(self) -> Option<Ref<U>> {
        let obj = self.detach();
        unsafe {
            match U::resolve(obj) {
                Some(ptr) => Some(Ref { ptr }),
                None => {
                    object_release(obj);
                    None
                }
            }
        }
    }

    /// Non-owning capability probe: borrows the object as another shape
    /// without touching reference counts.
    pub fn probe<U: ?Sized + Referent>(&self) -> Option<&U> {
        unsafe { U::resolve(self.object()).map(|ptr| &*ptr.as_ptr()) }
    }

    /// Creates a weak reference observing the same object.
    pub fn downgrade(&self) -> WeakRef<T> {
        unsafe {
            object_retain_weak(self.object());
        }
        WeakRef {
            ptr: Cell::new(Some(self.ptr)),
        }
    }
}

impl<T: ?Sized + Referent> Clone for Ref<T> {
    fn clone(&self) -> Ref<T> {
        unsafe {
            object_retain(self.object());
        }
        Ref { ptr: self.ptr }
    }
}

impl<T: ?Sized + Referent> Drop for Ref<T> {
    fn drop(&mut self) {
        unsafe {
            object_release(T::object_of(self.ptr));
        }
    }
}

impl<T: ?Sized + Referent> Deref for Ref<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // The reference owns a strong count, so the payload is alive.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ?Sized + Referent> PartialEq for Ref<T> {
    /// Identity comparison: two references are equal when they point at
    /// the same boxed object.
    fn eq(&self, other: &Ref<T>) -> bool {
        self.object() == other.object()
    }
}

impl<T: ?Sized + Referent> Eq for Ref<T> {}

impl<T: ?Sized + Referent> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref").field("object", &self.object()).finish()
    }
}

// A Ref hands out &T from any thread it lands on, so it is Send/Sync
// exactly when shared access to T is.
unsafe impl<T: ?Sized + Referent + Send + Sync> Send for Ref<T> {}
unsafe impl<T: ?Sized + Referent + Send + Sync> Sync for Ref<T> {}

/// Typed weak reference to a boxed object.
///
/// Owns one weak reference while non-null. Like
/// [`WeakObjRef`](crate::WeakObjRef), expiry is detected lazily on access,
/// at which point the wrapper releases its weak contribution and becomes
/// null.
pub struct WeakRef<T: ?Sized + Referent> {
    ptr: Cell<Option<NonNull<T>>>,
}

impl<T: ?Sized + Referent> WeakRef<T> {
    /// Creates a null reference that will never pin successfully.
    pub const fn null() -> WeakRef<T> {
        WeakRef {
            ptr: Cell::new(None),
        }
    }

    /// Releases the stored weak reference and nulls the slot.
    fn clear_slot(&self) {
        if let Some(ptr) = self.ptr.replace(None) {
            unsafe {
                object_release_weak(T::object_of(ptr));
            }
        }
    }

    /// The stored pointer after the lazy expiry check.
    fn current(&self) -> Option<NonNull<T>> {
        if let Some(ptr) = self.ptr.get() {
            if unsafe { crate::object::object_expired(T::object_of(ptr)) } {
                self.clear_slot();
            }
        }
        self.ptr.get()
    }

    /// Checks whether the reference is non-null and the object has not
    /// expired.
    pub fn is_valid(&self) -> bool {
        self.current().is_some()
    }

    /// The observed object's handle; null once the object has expired.
    ///
    /// Only guaranteed valid at the moment of return; use
    /// [`pin`](WeakRef::pin) before touching the payload.
    pub fn object(&self) -> ObjectPtr {
        match self.current() {
            Some(ptr) => T::object_of(ptr),
            None => ObjectPtr::null(),
        }
    }

    /// Releases the current reference, if any, and resets to null.
    pub fn reset(&self) {
        self.clear_slot();
    }

    /// Attempts to create a strong reference to the observed object.
    ///
    /// Succeeds only while the object's strong count is still positive;
    /// once the object has expired this returns `None` and drops the
    /// wrapper's weak contribution in passing.
    pub fn pin(&self) -> Option<Ref<T>> {
        let ptr = match self.ptr.get() {
            Some(ptr) => ptr,
            None => return None,
        };
        if unsafe { object_retain_if_not_expired(T::object_of(ptr)) } {
            Some(Ref { ptr })
        } else {
            self.clear_slot();
            None
        }
    }
}

impl<T: ?Sized + Referent> Default for WeakRef<T> {
    fn default() -> WeakRef<T> {
        WeakRef::null()
    }
}

impl<T: ?Sized + Referent> Clone for WeakRef<T> {
    fn clone(&self) -> WeakRef<T> {
        let ptr = self.current();
        if let Some(ptr) = ptr {
            unsafe {
                object_retain_weak(T::object_of(ptr));
            }
        }
        WeakRef {
            ptr: Cell::new(ptr),
        }
    }
}

impl<T: ?Sized + Referent> Drop for WeakRef<T> {
    fn drop(&mut self) {
        self.clear_slot();
    }
}

impl<T: ?Sized + Referent> From<&Ref<T>> for WeakRef<T> {
    fn from(strong: &Ref<T>) -> WeakRef<T> {
        strong.downgrade()
    }
}

impl<T: ?Sized + Referent> From<&Ref<T>> for crate::ObjRef {
    /// Erases the payload type, retaining the shared object.
    fn from(strong: &Ref<T>) -> crate::ObjRef {
        // The source reference keeps the object alive across the retain.
        unsafe { crate::ObjRef::from_object(strong.object()) }
    }
}

impl<T: ?Sized + Referent> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("object", &self.ptr.get().map(T::object_of))
            .finish()
    }
}

// Same payload-access argument as Ref; no Sync because of the lazily
// cleared Cell slot.
unsafe impl<T: ?Sized + Referent + Send + Sync> Send for WeakRef<T> {}
