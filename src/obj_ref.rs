//! # Typeless References
//!
//! Strong ([`ObjRef`]) and weak ([`WeakObjRef`]) smart pointers over
//! opaque object handles.
//!
//! These are the ownership primitives everything else builds on: a
//! non-null `ObjRef` contributes exactly one unit to the strong count, a
//! non-null `WeakObjRef` exactly one unit to the weak count. The typed
//! wrappers in [`typed`](crate::typed) delegate to the same lifecycle
//! operations after resolving their shape.
//!
//! A weak reference detects expiry lazily: the first access observing an
//! expired object drops the wrapper's weak contribution and nulls the
//! slot, rather than releasing eagerly on the object's expiry.

use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::object::{
    object_expired, object_release, object_release_weak, object_retain,
    object_retain_if_not_expired, object_retain_weak, object_type, ObjectPtr,
};
use crate::typeinfo::TypeInfo;

/// Typeless strong reference to a boxed object.
///
/// Null by default; a non-null `ObjRef` owns one strong reference and
/// releases it on drop.
pub struct ObjRef {
    obj: ObjectPtr,
}

impl ObjRef {
    /// Creates a null reference.
    pub const fn null() -> ObjRef {
        ObjRef {
            obj: ObjectPtr::null(),
        }
    }

    /// Creates a reference to `ptr`, retaining it.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a valid, unexpired, not-yet-freed handle.
    pub unsafe fn from_object(ptr: ObjectPtr) -> ObjRef {
        if !ptr.is_null() {
            object_retain(ptr);
        }
        ObjRef { obj: ptr }
    }

    /// Creates a reference over `ptr` without retaining: the caller's
    /// ownership of one strong reference transfers into the wrapper.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a valid handle for which the caller owns one
    /// strong reference.
    pub unsafe fn attaching(ptr: ObjectPtr) -> ObjRef {
        ObjRef { obj: ptr }
    }

    /// Checks whether the reference is non-null.
    pub fn is_valid(&self) -> bool {
        !self.obj.is_null()
    }

    /// The wrapped handle; null if the reference is null. No count
    /// traffic.
    pub fn get(&self) -> ObjectPtr {
        self.obj
    }

    /// Releases the current reference, if any, and resets to null.
    pub fn reset(&mut self) {
        let ptr = std::mem::replace(&mut self.obj, ObjectPtr::null());
        if !ptr.is_null() {
            // Construction guaranteed a valid handle with one owned
            // strong reference.
            unsafe {
                object_release(ptr);
            }
        }
    }

    /// Releases the current reference, if any, then stores `ptr` without
    /// retaining it.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a valid handle for which the caller owns one
    /// strong reference.
    pub unsafe fn attach(&mut self, ptr: ObjectPtr) {
        self.reset();
        self.obj = ptr;
    }

    /// Clears the reference to null and returns the previously owned
    /// handle without releasing it: ownership transfers to the caller.
    pub fn detach(&mut self) -> ObjectPtr {
        std::mem::replace(&mut self.obj, ObjectPtr::null())
    }

    /// The type of the referenced object; `None` for a null reference.
    pub fn type_info(&self) -> Option<TypeInfo> {
        if self.obj.is_null() {
            None
        } else {
            Some(unsafe { object_type(self.obj) })
        }
    }

    /// Creates a weak reference observing the same object.
    pub fn downgrade(&self) -> WeakObjRef {
        if self.obj.is_null() {
            WeakObjRef::null()
        } else {
            unsafe {
                object_retain_weak(self.obj);
            }
            WeakObjRef {
                obj: Cell::new(self.obj),
            }
        }
    }
}

impl Default for ObjRef {
    fn default() -> ObjRef {
        ObjRef::null()
    }
}

impl Clone for ObjRef {
    fn clone(&self) -> ObjRef {
        if !self.obj.is_null() {
            unsafe {
                object_retain(self.obj);
            }
        }
        ObjRef { obj: self.obj }
    }
}

impl Drop for ObjRef {
    fn drop(&mut self) {
        self.reset();
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &ObjRef) -> bool {
        self.obj == other.obj
    }
}

impl Eq for ObjRef {}

impl PartialOrd for ObjRef {
    fn partial_cmp(&self, other: &ObjRef) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjRef {
    fn cmp(&self, other: &ObjRef) -> std::cmp::Ordering {
        (self.obj.as_raw() as usize).cmp(&(other.obj.as_raw() as usize))
    }
}

impl Hash for ObjRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.obj.as_raw() as usize).hash(state);
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjRef")
            .field("object", &self.obj)
            .field("type", &self.type_info().map(|t| t.name()))
            .finish()
    }
}

/// Typeless weak reference to a boxed object.
///
/// Null by default; a non-null `WeakObjRef` owns one weak reference.
/// Expiry is detected lazily on access, at which point the wrapper
/// releases its weak contribution and becomes null.
pub struct WeakObjRef {
    obj: Cell<ObjectPtr>,
}

impl WeakObjRef {
    /// Creates a null reference.
    pub const fn null() -> WeakObjRef {
        WeakObjRef {
            obj: Cell::new(ObjectPtr::null()),
        }
    }

    /// Creates a weak reference to `ptr`, retaining it weakly.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a valid, not-yet-freed handle.
    pub unsafe fn from_object(ptr: ObjectPtr) -> WeakObjRef {
        if !ptr.is_null() {
            object_retain_weak(ptr);
        }
        WeakObjRef {
            obj: Cell::new(ptr),
        }
    }

    /// Releases the stored weak reference and nulls the slot.
    fn clear_slot(&self) {
        let ptr = self.obj.replace(ObjectPtr::null());
        if !ptr.is_null() {
            unsafe {
                object_release_weak(ptr);
            }
        }
    }

    /// The stored handle after the lazy expiry check.
    fn current(&self) -> ObjectPtr {
        let ptr = self.obj.get();
        if !ptr.is_null() && unsafe { object_expired(ptr) } {
            self.clear_slot();
        }
        self.obj.get()
    }

    /// Checks whether the reference is non-null and the object has not
    /// expired.
    pub fn is_valid(&self) -> bool {
        !self.current().is_null()
    }

    /// The wrapped handle; null if the reference is null or the object
    /// has expired.
    ///
    /// The returned handle is only guaranteed valid at the moment of
    /// return: a weak reference does not keep the payload alive. Use
    /// [`pin`](WeakObjRef::pin) to obtain a usable strong reference.
    pub fn get(&self) -> ObjectPtr {
        self.current()
    }

    /// Releases the current reference, if any, and resets to null.
    pub fn reset(&self) {
        self.clear_slot();
    }

    /// Releases the current reference, if any, then stores `ptr` without
    /// retaining it.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a valid handle for which the caller owns one
    /// weak reference.
    pub unsafe fn attach(&self, ptr: ObjectPtr) {
        self.clear_slot();
        self.obj.set(ptr);
    }

    /// Clears the reference to null and returns the previously owned
    /// handle (after the lazy expiry check) without releasing it.
    pub fn detach(&self) -> ObjectPtr {
        let ptr = self.current();
        self.obj.set(ObjectPtr::null());
        ptr
    }

    /// Attempts to create a strong reference to the observed object.
    ///
    /// Succeeds only while the object's strong count is still positive;
    /// returns a null [`ObjRef`] once the object has expired, releasing
    /// this wrapper's weak contribution in passing.
    pub fn pin(&self) -> ObjRef {
        let ptr = self.obj.get();
        if !ptr.is_null() && !unsafe { object_retain_if_not_expired(ptr) } {
            self.clear_slot();
        }
        // On success the slot still holds `ptr` and the freshly gained
        // strong reference transfers into the ObjRef; on failure the slot
        // is now null.
        unsafe { ObjRef::attaching(self.obj.get()) }
    }
}

impl Default for WeakObjRef {
    fn default() -> WeakObjRef {
        WeakObjRef::null()
    }
}

impl Clone for WeakObjRef {
    fn clone(&self) -> WeakObjRef {
        let ptr = self.current();
        if !ptr.is_null() {
            unsafe {
                object_retain_weak(ptr);
            }
        }
        WeakObjRef {
            obj: Cell::new(ptr),
        }
    }
}

impl Drop for WeakObjRef {
    fn drop(&mut self) {
        self.clear_slot();
    }
}

impl From<&ObjRef> for WeakObjRef {
    fn from(strong: &ObjRef) -> WeakObjRef {
        strong.downgrade()
    }
}

impl PartialEq for WeakObjRef {
    /// Two weak references are equal when their handles (after the lazy
    /// expiry check) are equal; two expired references compare equal.
    fn eq(&self, other: &WeakObjRef) -> bool {
        self.current() == other.current()
    }
}

impl Eq for WeakObjRef {}

impl fmt::Debug for WeakObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObjRef")
            .field("object", &self.obj.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::Guid;
    use crate::object::{object_alloc, object_ref_count, object_weak_ref_count};
    use crate::typeinfo::{register_type, TypeDescriptor, TypeInfo};
    use std::sync::OnceLock;

    fn plain_type() -> TypeInfo {
        static INFO: OnceLock<TypeInfo> = OnceLock::new();
        *INFO.get_or_init(|| unsafe {
            register_type(TypeDescriptor {
                guid: Guid::parse("a0a4583c-90b9-41f6-bd6a-8c1f8ad3705e"),
                name: "RefPlain",
                size: 8,
                alignment: 8,
                drop_fn: None,
                base: None,
            })
        })
    }

    fn fresh() -> ObjRef {
        unsafe { ObjRef::attaching(object_alloc(plain_type())) }
    }

    #[test]
    fn test_clone_retains_and_drop_releases() {
        let a = fresh();
        let ptr = a.get();
        unsafe {
            assert_eq!(object_ref_count(ptr), 1);
            let b = a.clone();
            assert_eq!(object_ref_count(ptr), 2);
            drop(b);
            assert_eq!(object_ref_count(ptr), 1);
        }
    }

    #[test]
    fn test_attach_detach_is_net_zero() {
        let mut a = fresh();
        let ptr = a.get();
        unsafe {
            assert_eq!(object_ref_count(ptr), 1);
            let detached = a.detach();
            assert!(!a.is_valid());
            assert_eq!(object_ref_count(ptr), 1);
            a.attach(detached);
            assert_eq!(object_ref_count(ptr), 1);
            assert_eq!(a.get(), ptr);
        }
    }

    #[test]
    fn test_weak_counts() {
        let a = fresh();
        let ptr = a.get();
        let w = a.downgrade();
        unsafe {
            assert_eq!(object_ref_count(ptr), 1);
            assert_eq!(object_weak_ref_count(ptr), 1);
            let w2 = w.clone();
            assert_eq!(object_weak_ref_count(ptr), 2);
            drop(w2);
            assert_eq!(object_weak_ref_count(ptr), 1);
        }
        assert!(w.is_valid());
    }

    #[test]
    fn test_pin_while_alive() {
        let a = fresh();
        let ptr = a.get();
        let w = a.downgrade();
        let pinned = w.pin();
        assert!(pinned.is_valid());
        assert_eq!(pinned.get(), ptr);
        unsafe {
            assert_eq!(object_ref_count(ptr), 2);
        }
    }

    #[test]
    fn test_pin_after_expiry_is_null() {
        let a = fresh();
        let w = a.downgrade();
        drop(a);
        let pinned = w.pin();
        assert!(!pinned.is_valid());
        // The weak wrapper released its contribution lazily.
        assert!(!w.is_valid());
    }

    #[test]
    fn test_null_reference_behaviour() {
        let mut null = ObjRef::null();
        assert!(!null.is_valid());
        assert!(null.type_info().is_none());
        assert_eq!(null.detach(), ObjectPtr::null());
        null.reset();
        let w = WeakObjRef::null();
        assert!(!w.pin().is_valid());
    }
}
