//! # Type Registry
//!
//! Process-wide registry mapping type GUIDs to immutable descriptors.
//!
//! Every boxed type must be registered exactly once before the first
//! instance is allocated. A descriptor records what the allocator and the
//! finalizer need: payload size, alignment and an optional destructor, plus
//! an optional base type for `is-a` queries.
//!
//! Registered descriptors are leaked into static storage, so a [`TypeInfo`]
//! is a plain `Copy` handle that can be stored in object headers and
//! compared by address without taking the registry lock.

use std::collections::HashMap;
use std::fmt;
use std::ptr;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::guid::Guid;

/// Destructor signature for boxed payloads.
///
/// Receives the payload address. `None` in a descriptor means the payload
/// is plain data and needs no finalization.
pub type DropFn = unsafe fn(*mut u8);

/// Immutable description of one registered boxed type.
pub struct TypeDescriptor {
    /// The GUID identifying this type.
    pub guid: Guid,
    /// Human-readable type name, used in diagnostics and leak reports.
    pub name: &'static str,
    /// Payload size in bytes.
    pub size: usize,
    /// Payload alignment in bytes. Must be a power of two.
    pub alignment: usize,
    /// Destructor invoked on the payload during finalization.
    pub drop_fn: Option<DropFn>,
    /// GUID of the base type, if any.
    ///
    /// Declaring a base asserts that this type's payload starts with the
    /// base type's payload layout, so a pointer to it may be reinterpreted
    /// as a pointer to the base. This is part of the `register_type`
    /// safety contract.
    pub base: Option<Guid>,
}

/// `Copy` handle to a registered type descriptor.
///
/// Two `TypeInfo` values are equal iff they refer to the same registration.
#[derive(Clone, Copy)]
pub struct TypeInfo(&'static TypeDescriptor);

impl TypeInfo {
    /// The GUID of the described type.
    pub fn guid(&self) -> Guid {
        self.0.guid
    }

    /// The name of the described type.
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.0.size
    }

    /// Payload alignment in bytes.
    pub fn alignment(&self) -> usize {
        self.0.alignment
    }

    /// The payload destructor, if the type has one.
    pub fn drop_fn(&self) -> Option<DropFn> {
        self.0.drop_fn
    }

    /// The base type, if one was declared.
    pub fn base(&self) -> Option<TypeInfo> {
        self.0.base.and_then(type_by_guid)
    }

    /// Checks whether `self` is `other` or a derived type of `other`.
    pub fn is(&self, other: TypeInfo) -> bool {
        let mut cur = Some(*self);
        while let Some(ti) = cur {
            if ti == other {
                return true;
            }
            cur = ti.base();
        }
        false
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &TypeInfo) -> bool {
        ptr::eq(self.0, other.0)
    }
}

impl Eq for TypeInfo {}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.0.name)
            .field("guid", &format_args!("{}", self.0.guid))
            .field("size", &self.0.size)
            .field("alignment", &self.0.alignment)
            .finish()
    }
}

/// Types that can live inside boxed objects.
///
/// Implemented through the [`boxed_type!`](crate::boxed_type) macro, which
/// also wires up the [`Referent`](crate::Referent) shape impl.
///
/// # Safety
///
/// `GUID` must be unique across the process and stable for the lifetime of
/// the program.
pub unsafe trait BoxedType: Sized + 'static {
    /// The GUID identifying this type.
    const GUID: Guid;
    /// Human-readable type name.
    const NAME: &'static str;
}

struct TypeRegistry {
    types: RwLock<HashMap<Guid, TypeInfo>>,
}

impl TypeRegistry {
    fn new() -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
        }
    }
}

static TYPE_REGISTRY: OnceLock<TypeRegistry> = OnceLock::new();

fn type_registry() -> &'static TypeRegistry {
    TYPE_REGISTRY.get_or_init(TypeRegistry::new)
}

/// Registers one type descriptor.
///
/// Registering the same GUID twice is a contract violation and panics.
///
/// # Safety
///
/// The descriptor must truthfully describe the payload: `size` and
/// `alignment` must match the type that will be constructed in allocated
/// payloads, `drop_fn` must be sound to call exactly once on such a
/// payload, and a declared `base` type's payload must be a layout prefix
/// of this type's payload.
pub unsafe fn register_type(desc: TypeDescriptor) -> TypeInfo {
    assert!(
        desc.alignment.is_power_of_two(),
        "type {} registered with non-power-of-two alignment {}",
        desc.name,
        desc.alignment
    );
    let mut types = type_registry().types.write();
    if types.contains_key(&desc.guid) {
        panic!("type GUID {} registered twice ({})", desc.guid, desc.name);
    }
    tracing::trace!(name = desc.name, guid = %desc.guid, "registering boxed type");
    let info = TypeInfo(Box::leak(Box::new(desc)));
    types.insert(info.guid(), info);
    info
}

/// Registers a Rust type as a boxed type, deriving layout and destructor
/// from the type itself.
pub fn register_boxed_type<T: BoxedType>() -> TypeInfo {
    unsafe fn drop_payload<T>(payload: *mut u8) {
        ptr::drop_in_place(payload as *mut T);
    }
    let drop_fn = if std::mem::needs_drop::<T>() {
        Some(drop_payload::<T> as DropFn)
    } else {
        None
    };
    // Sound: layout comes from T itself and the destructor is
    // `drop_in_place::<T>`; no base type is declared.
    unsafe {
        register_type(TypeDescriptor {
            guid: T::GUID,
            name: T::NAME,
            size: std::mem::size_of::<T>(),
            alignment: std::mem::align_of::<T>(),
            drop_fn,
            base: None,
        })
    }
}

/// Looks up a registered type by GUID.
pub fn type_by_guid(guid: Guid) -> Option<TypeInfo> {
    type_registry().types.read().get(&guid).copied()
}

/// Looks up the registered descriptor for a boxed Rust type.
///
/// Panics if the type was never registered; allocating instances of an
/// unregistered type is a contract violation.
pub fn type_of<T: BoxedType>() -> TypeInfo {
    match type_by_guid(T::GUID) {
        Some(info) => info,
        None => panic!("boxed type {} used before registration", T::NAME),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::Guid;

    struct Plain(#[allow(dead_code)] u64);

    unsafe impl BoxedType for Plain {
        const GUID: Guid = Guid::parse("9d0b0c30-6ee1-47b4-9c66-14b832e66fc2");
        const NAME: &'static str = "Plain";
    }

    #[test]
    fn test_register_and_lookup() {
        let info = register_boxed_type::<Plain>();
        assert_eq!(info.size(), 8);
        assert_eq!(info.alignment(), 8);
        assert!(info.drop_fn().is_none());
        let found = type_by_guid(Plain::GUID).unwrap();
        assert_eq!(found, info);
        assert_eq!(found.name(), "Plain");
    }

    #[test]
    fn test_unknown_guid_is_none() {
        let guid = Guid::parse("00000000-0000-0000-0000-00000000dead");
        assert!(type_by_guid(guid).is_none());
    }

    #[test]
    fn test_base_chain_is_query() {
        let base_guid = Guid::parse("52f7c383-1a70-4a39-8e24-0d0026f9b1c8");
        let derived_guid = Guid::parse("52f7c383-1a70-4a39-8e24-0d0026f9b1c9");
        // Both payloads are a single u32; the prefix contract holds
        // trivially.
        let base = unsafe {
            register_type(TypeDescriptor {
                guid: base_guid,
                name: "Base",
                size: 4,
                alignment: 4,
                drop_fn: None,
                base: None,
            })
        };
        let derived = unsafe {
            register_type(TypeDescriptor {
                guid: derived_guid,
                name: "Derived",
                size: 4,
                alignment: 4,
                drop_fn: None,
                base: Some(base_guid),
            })
        };
        assert!(derived.is(base));
        assert!(derived.is(derived));
        assert!(!base.is(derived));
    }
}
