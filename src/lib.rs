//! # Opal Object Runtime
//!
//! A type-erased, reference-counted boxed-object runtime: heap objects
//! carry a hidden header with a strong count, a weak count, and run-time
//! type information, and are manipulated through a typeless handle
//! ([`ObjectPtr`]) or through typed smart pointers ([`Ref`], [`WeakRef`]).
//!
//! ## Architecture
//!
//! - [`guid`] — 128-bit globally unique identifiers naming types and
//!   interfaces.
//! - [`typeinfo`] — the global type registry mapping GUIDs to layout and
//!   destructor metadata.
//! - [`object`] — allocation, counting, and the two-phase destruction
//!   protocol on raw handles.
//! - [`interface`] — the dynamic cast registry behind capability queries.
//! - [`obj_ref`] — typeless owning wrappers ([`ObjRef`], [`WeakObjRef`]).
//! - [`typed`] — typed owning wrappers and the [`boxed_type!`] /
//!   [`interface!`] / [`impl_interfaces!`] declaration macros.
//!
//! ## Example
//!
//! ```
//! use opal_object::{register_boxed_type, Ref};
//!
//! struct Counter { value: i64 }
//! opal_object::boxed_type!(Counter = "05f3f2b8-3e4f-4b3e-a1c2-7de0c8b1d944");
//!
//! register_boxed_type::<Counter>();
//! let counter = Ref::new(Counter { value: 7 });
//! let alias = counter.clone();
//! assert_eq!(alias.value, 7);
//! ```
//!
//! ## Thread safety
//!
//! All counter and lifecycle-state traffic is sequentially consistent, so
//! handles may be retained and released from any thread. Typed access to
//! the payload follows the usual `Send`/`Sync` rules of the payload type.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod guid;
pub mod interface;
pub mod obj_ref;
pub mod object;
pub mod typed;
pub mod typeinfo;

pub use guid::{Guid, GuidParseError};
pub use interface::{is_interface_implemented, query_interface, register_cast, CastFn, Interface};
pub use obj_ref::{ObjRef, WeakObjRef};
pub use object::{
    object_alloc, object_expired, object_is_type, object_ref_count, object_release,
    object_release_weak, object_retain, object_retain_if_not_expired, object_retain_weak,
    object_type, object_weak_ref_count, ObjectPtr,
};
pub use typed::{resolve_boxed, Ref, Referent, WeakRef};
pub use typeinfo::{
    register_boxed_type, register_type, type_by_guid, type_of, BoxedType, DropFn, TypeDescriptor,
    TypeInfo,
};

#[cfg(feature = "leak-track")]
pub use object::{live_object_count, report_leaks};
