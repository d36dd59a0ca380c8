//! # Interface Registry
//!
//! GUID-keyed capability dispatch for boxed objects.
//!
//! An *interface* is a capability contract a concrete boxed type may
//! implement, expressed as a Rust trait and identified by a [`Guid`]. In
//! place of multiple virtual inheritance, each `(concrete type, interface)`
//! pair registers one pure cast function in a process-wide table;
//! [`query_interface`] resolves a handle's type and applies the matching
//! cast at run time.
//!
//! Cast functions produce `*mut I` where `I` is a `dyn Trait` type. The
//! table stores them type-erased behind `dyn Any` and recovers the concrete
//! function generically at query time, so a single registry serves every
//! interface without a shared pointer representation.
//!
//! The registry is append-only and expected to be fully populated during
//! process initialization, before instances of the registered types exist.

use std::any::Any;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::guid::Guid;
use crate::object::{object_type, ObjectPtr};

/// A capability contract identified by a GUID.
///
/// Implemented for `dyn Trait` types through the
/// [`interface!`](crate::interface) macro.
///
/// # Safety
///
/// `IID` must be unique across the process and stable for the lifetime of
/// the program.
pub unsafe trait Interface: 'static {
    /// The GUID identifying this interface.
    const IID: Guid;
}

/// Cast function turning a boxed-object handle into an interface pointer.
///
/// Must be pure: no allocation, no reference-count traffic, no side
/// effects. The produced pointer's data address must equal the handle.
pub type CastFn<I> = fn(ObjectPtr) -> *mut I;

/// Type-erased holder for one registered cast function.
struct Caster<I: ?Sized + 'static> {
    cast: CastFn<I>,
}

struct InterfaceRegistry {
    entries: RwLock<HashMap<(Guid, Guid), Box<dyn Any + Send + Sync>>>,
}

impl InterfaceRegistry {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

static INTERFACE_REGISTRY: OnceLock<InterfaceRegistry> = OnceLock::new();

fn interface_registry() -> &'static InterfaceRegistry {
    INTERFACE_REGISTRY.get_or_init(InterfaceRegistry::new)
}

/// Registers the cast function for one `(concrete type, interface)` pair.
///
/// Registering the same pair twice is a contract violation and panics.
/// Prefer the [`impl_interfaces!`](crate::impl_interfaces) macro, which
/// derives the cast function from an unsizing pointer cast.
pub fn register_cast<I: ?Sized + Interface>(type_guid: Guid, cast: CastFn<I>) {
    let mut entries = interface_registry().entries.write();
    let key = (type_guid, I::IID);
    if entries.contains_key(&key) {
        panic!(
            "interface {} registered twice for type {}",
            I::IID,
            type_guid
        );
    }
    tracing::trace!(ty = %type_guid, interface = %I::IID, "registering interface cast");
    entries.insert(key, Box::new(Caster::<I> { cast }));
}

/// Checks whether the given type registered an implementation of the given
/// interface.
///
/// Lookup only; never allocates and never touches reference counts.
pub fn is_interface_implemented(type_guid: Guid, iid: Guid) -> bool {
    interface_registry()
        .entries
        .read()
        .contains_key(&(type_guid, iid))
}

/// Gets an interface pointer from a boxed-object handle.
///
/// Resolves the handle's type, looks up the `(type, interface)` cast and
/// applies it. Returns `None` when the handle is null or the object's type
/// does not implement `I`. Never mutates reference counts: the returned
/// pointer is only as durable as the strong reference the caller holds.
///
/// # Safety
///
/// `ptr` must be null or a valid, not-yet-freed handle from
/// [`object_alloc`](crate::object_alloc).
pub unsafe fn query_interface<I: ?Sized + Interface>(ptr: ObjectPtr) -> Option<NonNull<I>> {
    if ptr.is_null() {
        return None;
    }
    let type_guid = object_type(ptr).guid();
    let entries = interface_registry().entries.read();
    let entry = entries.get(&(type_guid, I::IID))?;
    // The entry under (type, I::IID) was inserted by register_cast::<I>,
    // so the downcast cannot fail for a well-formed registry.
    let caster = entry
        .downcast_ref::<Caster<I>>()
        .expect("interface registry entry has mismatched caster type");
    NonNull::new((caster.cast)(ptr))
}

/// Declares the GUID of an interface trait and wires the capability shape
/// into the typed reference machinery.
///
/// ```ignore
/// trait Renderer { fn draw(&self); }
/// opal_object::interface!(dyn Renderer = "c3d1a9ce-6f1c-43a8-9b6b-2a3d57cf1a01");
/// ```
#[macro_export]
macro_rules! interface {
    (dyn $iface:path = $guid:literal) => {
        unsafe impl $crate::Interface for dyn $iface {
            const IID: $crate::Guid = $crate::Guid::parse($guid);
        }
        unsafe impl $crate::Referent for dyn $iface {
            const CAST_ID: $crate::Guid = <dyn $iface as $crate::Interface>::IID;
            fn object_of(this: ::core::ptr::NonNull<Self>) -> $crate::ObjectPtr {
                $crate::ObjectPtr::from_raw(this.as_ptr() as *mut u8)
            }
            unsafe fn resolve(
                obj: $crate::ObjectPtr,
            ) -> ::core::option::Option<::core::ptr::NonNull<Self>> {
                $crate::query_interface::<dyn $iface>(obj)
            }
        }
    };
}

/// Registers the interfaces a boxed type implements, one cast per listed
/// trait.
///
/// Call during process initialization, after the traits were declared with
/// [`interface!`](crate::interface) and before instances of the type exist:
///
/// ```ignore
/// opal_object::impl_interfaces!(Sprite: Renderer, Collider);
/// ```
#[macro_export]
macro_rules! impl_interfaces {
    ($ty:ty : $($iface:path),+ $(,)?) => {
        $(
            $crate::register_cast::<dyn $iface>(
                <$ty as $crate::BoxedType>::GUID,
                |obj| obj.as_ptr::<$ty>() as *mut dyn $iface,
            );
        )+
    };
}
