//! Serializability verification by execution.
//!
//! A value is serializable when it survives a `MsgPack` encode/decode round
//! trip and the decoded clone is deeply, strictly equal to the original. The
//! check is behind [`RoundTripCheck`] so the format can be swapped without
//! touching callers.
//!
//! Before encoding, the value's shape is measured once per shared node. Values
//! that would expand past [`MAX_EXPANDED_NODES`] or nest deeper than
//! [`MAX_DATA_DEPTH`] are rejected without being written out.

use std::collections::HashMap;

use tracing::debug;

use crate::types::{Value, MAX_DEPTH};

/// Most nodes a value may have once every shared node is written out in full.
pub const MAX_EXPANDED_NODES: usize = 1 << 20;

/// Deepest container nesting accepted for data, leaving room under the
/// decoder's limit for the protocol messages that wrap an outcome.
pub const MAX_DATA_DEPTH: usize = MAX_DEPTH - 16;

/// Decides whether a value can cross the boundary without loss.
pub trait RoundTripCheck: Send + Sync {
    /// Returns `true` only if `value` round-trips exactly. Never panics or errors.
    fn can_round_trip(&self, value: &Value) -> bool;
}

/// Round-trip check backed by `rmp-serde`, the format used on the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackRoundTrip;

impl MsgPackRoundTrip {
    /// Encodes and decodes `value` once, returning the decoded clone.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded (functions, cycles,
    /// excessive nesting) or the encoded bytes cannot be decoded.
    pub fn round_trip(value: &Value) -> anyhow::Result<Value> {
        let bytes = rmp_serde::to_vec_named(value)?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }
}

impl RoundTripCheck for MsgPackRoundTrip {
    fn can_round_trip(&self, value: &Value) -> bool {
        if let Err(rejection) = Measure::default().shape(value, 0) {
            debug!(reason = %rejection, kind = value.kind(), "value cannot be round-tripped");
            return false;
        }
        match Self::round_trip(value) {
            Ok(clone) if deep_strict_equal(value, &clone) => true,
            Ok(clone) => {
                debug!(
                    original = value.kind(),
                    decoded = clone.kind(),
                    "round-tripped value differs from original"
                );
                false
            }
            Err(err) => {
                debug!(error = %err, kind = value.kind(), "value cannot be round-tripped");
                false
            }
        }
    }
}

/// Why a value was refused before encoding.
#[derive(Debug, thiserror::Error)]
enum Rejection {
    #[error("value contains a function")]
    Function,
    #[error("value contains a circular reference")]
    Cycle,
    #[error("value nests deeper than {} levels", MAX_DATA_DEPTH)]
    TooDeep,
    #[error("value expands to more than {} nodes", MAX_EXPANDED_NODES)]
    TooLarge,
}

/// Expanded node count and container height of a subtree.
#[derive(Debug, Clone, Copy)]
struct Shape {
    nodes: usize,
    height: usize,
}

/// Walks a value once, remembering the shape of every shared node it has
/// fully measured.
#[derive(Default)]
struct Measure {
    done: HashMap<usize, Shape>,
    path: Vec<usize>,
}

impl Measure {
    fn shape(&mut self, value: &Value, depth: usize) -> Result<Shape, Rejection> {
        match value {
            Value::Function(_) => Err(Rejection::Function),
            Value::Array(items) => self.container(items.iter(), depth),
            Value::Map(entries) => self.container(entries.values(), depth),
            Value::Shared(node) => {
                let addr = node.addr();
                if let Some(shape) = self.done.get(&addr) {
                    return if depth + shape.height > MAX_DATA_DEPTH {
                        Err(Rejection::TooDeep)
                    } else {
                        Ok(*shape)
                    };
                }
                if self.path.contains(&addr) {
                    return Err(Rejection::Cycle);
                }
                self.path.push(addr);
                let shape = node.with(|inner| self.shape(inner, depth));
                self.path.pop();
                let shape = shape?;
                self.done.insert(addr, shape);
                Ok(shape)
            }
            _ => Ok(Shape {
                nodes: 1,
                height: 0,
            }),
        }
    }

    fn container<'a>(
        &mut self,
        children: impl Iterator<Item = &'a Value>,
        depth: usize,
    ) -> Result<Shape, Rejection> {
        let depth = depth + 1;
        if depth > MAX_DATA_DEPTH {
            return Err(Rejection::TooDeep);
        }
        let mut shape = Shape {
            nodes: 1,
            height: 1,
        };
        for child in children {
            let child = self.shape(child, depth)?;
            shape.nodes = shape.nodes.saturating_add(child.nodes);
            if shape.nodes > MAX_EXPANDED_NODES {
                return Err(Rejection::TooLarge);
            }
            shape.height = shape.height.max(child.height + 1);
        }
        Ok(shape)
    }
}

/// Whether `value` survives a `MsgPack` round trip unchanged.
#[must_use]
pub fn is_serializable(value: &Value) -> bool {
    MsgPackRoundTrip.can_round_trip(value)
}

/// Deep strict equality that looks through shared nodes.
///
/// Same rules as `Value`'s `PartialEq` for leaves (bitwise floats, identity
/// for functions). A shared node equals whatever its contents equal. A cycle
/// reached on either side makes the comparison false. Shared nodes are walked
/// once per occurrence, so cost follows the expanded size of the values.
#[must_use]
pub fn deep_strict_equal(left: &Value, right: &Value) -> bool {
    let mut path = Vec::new();
    strict_equal(left, right, &mut path)
}

fn strict_equal(left: &Value, right: &Value, path: &mut Vec<usize>) -> bool {
    match (left, right) {
        (Value::Shared(a), Value::Shared(b)) if a.ptr_eq(b) => true,
        (Value::Shared(node), other) | (other, Value::Shared(node)) => {
            let addr = node.addr();
            if path.contains(&addr) {
                return false;
            }
            path.push(addr);
            let equal = node.with(|inner| strict_equal(inner, other, path));
            path.pop();
            equal
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| strict_equal(x, y, path))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .zip(b)
                    .all(|((ka, va), (kb, vb))| ka == kb && strict_equal(va, vb, path))
        }
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::types::SharedValue;

    fn plain_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>().prop_map(Value::Float),
            ".{0,12}".prop_map(Value::String),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                proptest::collection::btree_map(".{0,8}", inner, 0..8).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn plain_data_is_serializable(value in plain_value()) {
            prop_assert!(is_serializable(&value));
        }
    }

    #[test]
    fn primitives_are_serializable() {
        assert!(is_serializable(&Value::Null));
        assert!(is_serializable(&Value::Int(42)));
        assert!(is_serializable(&Value::from("text")));
        assert!(is_serializable(&Value::from(json!({"a": [1, {"b": null}]}))));
    }

    #[test]
    fn negative_zero_and_nan_are_serializable() {
        assert!(is_serializable(&Value::Float(-0.0)));
        assert!(is_serializable(&Value::Float(f64::NAN)));
        assert!(is_serializable(&Value::Float(f64::NEG_INFINITY)));
    }

    #[test]
    fn function_is_not_serializable() {
        assert!(!is_serializable(&Value::function(|| async { Ok(Value::Null) })));
    }

    #[test]
    fn nested_function_is_not_serializable() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "a".to_string(),
            Value::function(|| async { Ok(Value::Null) }),
        );
        assert!(!is_serializable(&Value::Map(entries)));
    }

    #[test]
    fn self_reference_is_not_serializable() {
        let node = SharedValue::new(Value::Null);
        let mut entries = BTreeMap::new();
        entries.insert("me".to_string(), Value::Shared(node.clone()));
        node.set(Value::Map(entries));
        assert!(!is_serializable(&Value::Shared(node)));
    }

    #[test]
    fn aliased_acyclic_node_is_serializable() {
        let node = SharedValue::new(Value::from(json!({"x": 1})));
        let value = Value::Array(vec![Value::Shared(node.clone()), Value::Shared(node)]);
        assert!(is_serializable(&value));
    }

    #[test]
    fn deep_equal_looks_through_shared_nodes() {
        let node = Value::shared(Value::Int(1));
        assert!(deep_strict_equal(&node, &Value::Int(1)));
        assert!(deep_strict_equal(&Value::Int(1), &node));
        assert!(!deep_strict_equal(&node, &Value::Int(2)));
    }

    #[test]
    fn deep_equal_rejects_cycles() {
        let node = SharedValue::new(Value::Null);
        node.set(Value::Array(vec![Value::Shared(node.clone())]));
        let other = Value::Array(vec![Value::Array(vec![Value::Null])]);
        assert!(!deep_strict_equal(&Value::Shared(node), &other));
    }

    #[test]
    fn deep_equal_distinguishes_types() {
        assert!(!deep_strict_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(!deep_strict_equal(&Value::Float(0.0), &Value::Float(-0.0)));
        assert!(!deep_strict_equal(
            &Value::from(json!({"a": 1})),
            &Value::from(json!({"b": 1}))
        ));
    }

    /// Each level holds the previous level twice through one shared node.
    fn shared_dag(levels: usize) -> Value {
        let mut value = Value::Int(1);
        for _ in 0..levels {
            let node = SharedValue::new(value);
            value = Value::Array(vec![Value::Shared(node.clone()), Value::Shared(node)]);
        }
        value
    }

    fn nested_arrays(depth: usize) -> Value {
        let mut value = Value::Null;
        for _ in 0..depth {
            value = Value::Array(vec![value]);
        }
        value
    }

    /// Runs `f` on a thread with room for a round trip of maximally nested data.
    fn on_large_stack(f: impl FnOnce() + Send + 'static) {
        std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap();
    }

    #[test]
    fn small_shared_dag_is_serializable() {
        assert!(is_serializable(&shared_dag(8)));
    }

    #[test]
    fn huge_shared_dag_is_rejected_quickly() {
        let start = std::time::Instant::now();
        assert!(!is_serializable(&shared_dag(40)));
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn nesting_limit_leaves_room_for_the_envelope() {
        on_large_stack(|| {
            assert!(is_serializable(&nested_arrays(MAX_DATA_DEPTH)));
            assert!(!is_serializable(&nested_arrays(MAX_DATA_DEPTH + 1)));
            assert!(!is_serializable(&nested_arrays(MAX_DEPTH - 1)));
        });
    }

    #[test]
    fn shared_node_counts_toward_depth_wherever_it_appears() {
        on_large_stack(|| {
            let node = SharedValue::new(nested_arrays(MAX_DATA_DEPTH - 1));
            let shallow = Value::Array(vec![Value::Shared(node.clone())]);
            assert!(is_serializable(&shallow));

            let deep = Value::Array(vec![
                Value::Shared(node.clone()),
                Value::Array(vec![Value::Shared(node)]),
            ]);
            assert!(!is_serializable(&deep));
        });
    }

    /// Check that accepts nothing, to prove callers go through the trait.
    struct RejectAll;

    impl RoundTripCheck for RejectAll {
        fn can_round_trip(&self, _value: &Value) -> bool {
            false
        }
    }

    #[test]
    fn check_is_swappable() {
        let checks: [&dyn RoundTripCheck; 2] = [&MsgPackRoundTrip, &RejectAll];
        let verdicts: Vec<bool> = checks
            .iter()
            .map(|c| c.can_round_trip(&Value::Int(1)))
            .collect();
        assert_eq!(verdicts, vec![true, false]);
    }
}
