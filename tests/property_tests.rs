//! Property-based tests for the object runtime.
//!
//! Uses proptest to generate random inputs and verify invariants hold.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use proptest::prelude::*;

use opal_object::{
    object_alloc, object_expired, object_ref_count, object_release, object_retain,
    register_type, Guid, ObjRef, TypeDescriptor, TypeInfo,
};

/// Strategy for generating arbitrary GUID halves.
fn guid_parts() -> impl Strategy<Value = (u64, u64)> {
    (any::<u64>(), any::<u64>())
}

/// Strategy for sequences of retain (true) / release (false) operations.
///
/// Generated so the running strong count never goes below one until the
/// trailing releases drain it.
fn balanced_ops() -> impl Strategy<Value = Vec<bool>> {
    proptest::collection::vec(any::<bool>(), 0..64).prop_map(|raw| {
        let mut ops = Vec::with_capacity(raw.len() * 2);
        let mut held = 1i32;
        for retain in raw {
            if retain {
                held += 1;
                ops.push(true);
            } else if held > 1 {
                held -= 1;
                ops.push(false);
            }
        }
        while held > 0 {
            held -= 1;
            ops.push(false);
        }
        ops
    })
}

static DROPS: AtomicUsize = AtomicUsize::new(0);

unsafe fn count_drop(_payload: *mut u8) {
    DROPS.fetch_add(1, Ordering::SeqCst);
}

fn dropper_type() -> TypeInfo {
    static INFO: OnceLock<TypeInfo> = OnceLock::new();
    *INFO.get_or_init(|| unsafe {
        register_type(TypeDescriptor {
            guid: Guid::parse("1a7c9f02-6a6e-4d25-92cc-7e4e2b5b88d0"),
            name: "PropDropper",
            size: 8,
            alignment: 8,
            drop_fn: Some(count_drop),
            base: None,
        })
    })
}

fn plain_type() -> TypeInfo {
    static INFO: OnceLock<TypeInfo> = OnceLock::new();
    *INFO.get_or_init(|| unsafe {
        register_type(TypeDescriptor {
            guid: Guid::parse("1a7c9f02-6a6e-4d25-92cc-7e4e2b5b88d1"),
            name: "PropPlain",
            size: 8,
            alignment: 8,
            drop_fn: None,
            base: None,
        })
    })
}

proptest! {
    /// Display and FromStr agree for every GUID value.
    #[test]
    fn guid_display_parse_roundtrip((high, low) in guid_parts()) {
        let guid = Guid::new(high, low);
        let text = guid.to_string();
        let parsed: Guid = text.parse().unwrap();
        prop_assert_eq!(parsed, guid);
    }

    /// The braced rendering parses back to the same GUID.
    #[test]
    fn guid_braced_form_parses((high, low) in guid_parts()) {
        let guid = Guid::new(high, low);
        let braced = format!("{{{guid}}}");
        let parsed: Guid = braced.parse().unwrap();
        prop_assert_eq!(parsed, guid);
    }

    /// GUID ordering is lexicographic on (high, low).
    #[test]
    fn guid_ordering_is_lexicographic((ah, al) in guid_parts(), (bh, bl) in guid_parts()) {
        let a = Guid::new(ah, al);
        let b = Guid::new(bh, bl);
        prop_assert_eq!(a.cmp(&b), (ah, al).cmp(&(bh, bl)));
    }

    /// Any balanced interleaving of retains and releases finalizes the
    /// object exactly once, with counts matching the ledger throughout.
    #[test]
    fn balanced_ops_finalize_exactly_once(ops in balanced_ops()) {
        let before = DROPS.load(Ordering::SeqCst);
        let obj = object_alloc(dropper_type());
        prop_assert!(!obj.is_null());
        let mut held = 1i32;
        unsafe {
            for retain in ops {
                if retain {
                    held += 1;
                    prop_assert_eq!(object_retain(obj), held);
                } else {
                    held -= 1;
                    prop_assert_eq!(object_release(obj), held);
                }
                if held > 0 {
                    prop_assert_eq!(object_ref_count(obj), held);
                    prop_assert!(!object_expired(obj));
                }
            }
        }
        prop_assert_eq!(held, 0);
        prop_assert_eq!(DROPS.load(Ordering::SeqCst), before + 1);
    }

    /// Any number of detach/attach round trips leaves the strong count
    /// untouched.
    #[test]
    fn attach_detach_is_net_zero(cycles in 0usize..32) {
        let obj = object_alloc(plain_type());
        prop_assert!(!obj.is_null());
        let mut strong = unsafe { ObjRef::attaching(obj) };
        for _ in 0..cycles {
            let detached = strong.detach();
            prop_assert!(!strong.is_valid());
            unsafe {
                prop_assert_eq!(object_ref_count(obj), 1);
                strong.attach(detached);
            }
        }
        prop_assert_eq!(strong.get(), obj);
        unsafe {
            prop_assert_eq!(object_ref_count(obj), 1);
        }
    }
}
