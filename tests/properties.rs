// Property tests for values, numbers, operators and path set operations

use std::collections::BTreeSet;

use jsonflow_core::path::{leaf_paths, merge, reclude, retain};
use jsonflow_core::{operators, BinaryOp, Number, Path, Value};
use proptest::prelude::*;

/// Nested objects and arrays of small integers; keys come from a short
/// alphabet so siblings collide often.
fn tree() -> impl Strategy<Value = serde_json::Value> {
    let leaf = any::<i32>().prop_map(serde_json::Value::from);
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::btree_map("[a-e]", inner.clone(), 0..4)
                .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
            prop::collection::vec(inner, 0..4).prop_map(serde_json::Value::Array),
        ]
    })
}

fn object() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-e]", tree(), 1..5)
        .prop_map(|m| Value::from(serde_json::Value::Object(m.into_iter().collect())))
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::raw),
    ]
}

fn leaves(value: &Value) -> BTreeSet<String> {
    leaf_paths(value).iter().map(Path::to_string).collect()
}

proptest! {
    #[test]
    fn integral_arithmetic_has_precision_zero(a in -100_000i64..100_000, b in -100_000i64..100_000) {
        let (x, y) = (Number::integer(a), Number::integer(b));
        prop_assert_eq!(x.add(y).precision_marker(), Some(0));
        prop_assert_eq!(x.sub(y).precision_marker(), Some(0));
        prop_assert_eq!(x.mul(y).precision_marker(), Some(0));
    }

    #[test]
    fn sums_keep_the_wider_precision(a in -1000i32..1000, b in -1000i32..1000, p in 0u8..4, q in 0u8..4) {
        let x = Number::with_precision(f64::from(a) / 10.0, p);
        let y = Number::with_precision(f64::from(b) / 10.0, q);
        prop_assert_eq!(x.add(y).precision(), p.max(q));
    }

    #[test]
    fn empty_is_additive_identity(x in scalar()) {
        prop_assert_eq!(operators::binary(BinaryOp::Add, &x, &Value::Empty).unwrap(), x.clone());
        prop_assert_eq!(operators::binary(BinaryOp::Add, &Value::Empty, &x).unwrap(), x);
    }

    #[test]
    fn deep_copies_are_independent(original in object()) {
        let snapshot = original.to_json_string().unwrap();
        let mut copy = original.deep_copy();
        prop_assert_eq!(&copy, &original);

        if let Some(map) = copy.as_object_mut() {
            map.insert("zz".to_string(), Value::from(1));
            if let Some((_, first)) = map.first_mut() {
                *first = Value::Null;
            }
        }
        prop_assert_eq!(original.to_json_string().unwrap(), snapshot);
    }

    #[test]
    fn retain_and_reclude_partition_leaves(o in object(), mask in prop::collection::vec(any::<bool>(), 64)) {
        let all = leaf_paths(&o);
        let chosen: Vec<Path> = all
            .iter()
            .zip(mask.iter().cycle())
            .filter(|(_, keep)| **keep)
            .map(|(p, _)| p.clone())
            .collect();

        let retained = retain(&o, &chosen);
        let recluded = reclude(&o, &chosen);
        prop_assert_eq!(&merge(&retained, &recluded), &o);

        let kept = leaves(&retained);
        let dropped = leaves(&recluded);

        prop_assert!(kept.is_disjoint(&dropped));
        let union: BTreeSet<String> = kept.union(&dropped).cloned().collect();
        prop_assert_eq!(union, leaves(&o));
        prop_assert_eq!(kept, chosen.iter().map(Path::to_string).collect::<BTreeSet<_>>());
    }

    #[test]
    fn intersection_is_bounded_by_both_sides(
        a in prop::collection::vec(0i32..6, 0..8),
        b in prop::collection::vec(0i32..6, 0..8),
    ) {
        let lhs = Value::array(a.iter().copied().map(Value::from).collect());
        let rhs = Value::array(b.iter().copied().map(Value::from).collect());
        let common = operators::binary(BinaryOp::Divide, &lhs, &rhs).unwrap();
        let common = common.as_array().cloned().unwrap_or_default();
        prop_assert!(common.len() <= a.len().min(b.len()));

        let diff = operators::binary(BinaryOp::Modulo, &lhs, &rhs).unwrap();
        let diff = diff.as_array().cloned().unwrap_or_default();
        prop_assert_eq!(common.len() * 2 + diff.len(), a.len() + b.len());
    }
}
