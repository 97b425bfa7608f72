//! Export classification: which entries of a module's exported tree are
//! function placeholders rather than plain data.
//!
//! The producing side replaces every live function with the function marker
//! ([`to_transport`]); the receiving side uses the predicates here to learn
//! which entries are callable stand-ins.

use std::collections::BTreeMap;

use crate::marker::{function_marker, is_function_placeholder};
use crate::types::Value;

/// Errors from querying a module's exported functions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("module does not export any function")]
    NoExportedFunction,
}

/// A named export whose value is a function placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedFunctionExport {
    /// Export name.
    pub name: String,
    /// The marker string received in place of the function.
    pub body: String,
}

/// Whether `tree` is a plain mapping with at least one function placeholder value.
#[must_use]
pub fn has_any_named_function_export(tree: &Value) -> bool {
    tree.as_map()
        .is_some_and(|entries| entries.values().any(is_function_placeholder))
}

/// Whether the module exports a function, either as its default export or by name.
#[must_use]
pub fn exports_any_function(tree: &Value) -> bool {
    is_function_placeholder(tree) || has_any_named_function_export(tree)
}

/// Collects every named export whose value is a function placeholder.
///
/// # Errors
///
/// Returns `ClassifyError::NoExportedFunction` when
/// [`has_any_named_function_export`] is false for `tree`.
pub fn named_function_exports(tree: &Value) -> Result<Vec<NamedFunctionExport>, ClassifyError> {
    match tree {
        Value::Map(entries) if has_any_named_function_export(tree) => Ok(entries
            .iter()
            .filter_map(|(name, body)| match body {
                Value::String(marker) if is_function_placeholder(body) => {
                    Some(NamedFunctionExport {
                        name: name.clone(),
                        body: marker.clone(),
                    })
                }
                _ => None,
            })
            .collect()),
        _ => Err(ClassifyError::NoExportedFunction),
    }
}

/// Replaces live functions with the function marker so the tree can be sent.
///
/// Covers a function exported as the whole module and functions directly
/// under a top-level mapping, looking through one shared node at either
/// level. Anything nested deeper is left as is.
#[must_use]
pub fn to_transport(tree: &Value) -> Value {
    match tree {
        Value::Shared(node) => node.with(transport_level),
        other => transport_level(other),
    }
}

fn transport_level(tree: &Value) -> Value {
    match tree {
        Value::Function(_) => Value::String(function_marker()),
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(name, value)| {
                    let value = if value.function_ref().is_some() {
                        Value::String(function_marker())
                    } else {
                        value.clone()
                    };
                    (name.clone(), value)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tagged representation
// ---------------------------------------------------------------------------

/// A received export, tagged once so later code never re-inspects marker text.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportedValue {
    /// Ordinary data.
    Plain(Value),
    /// Stand-in for a function that lives on the other side.
    FunctionPlaceholder,
}

impl ExportedValue {
    /// Tags a single received value.
    #[must_use]
    pub fn classify(value: Value) -> Self {
        if is_function_placeholder(&value) {
            ExportedValue::FunctionPlaceholder
        } else {
            ExportedValue::Plain(value)
        }
    }

    /// Whether this entry stands in for a function.
    #[must_use]
    pub fn is_function(&self) -> bool {
        matches!(self, ExportedValue::FunctionPlaceholder)
    }
}

/// Shape of a module's exports as seen by the receiving side.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleExports {
    /// The module exports a single value.
    Default(ExportedValue),
    /// The module exports a mapping of named values.
    Named(BTreeMap<String, ExportedValue>),
}

impl ModuleExports {
    /// Classifies a tree received over the wire.
    #[must_use]
    pub fn from_wire(tree: Value) -> Self {
        match tree {
            Value::Map(entries) => ModuleExports::Named(
                entries
                    .into_iter()
                    .map(|(name, value)| (name, ExportedValue::classify(value)))
                    .collect(),
            ),
            other => ModuleExports::Default(ExportedValue::classify(other)),
        }
    }

    /// Whether the module itself is a function.
    #[must_use]
    pub fn has_default_function(&self) -> bool {
        matches!(self, ModuleExports::Default(ExportedValue::FunctionPlaceholder))
    }

    /// Names of the exports that are functions, in sorted order.
    #[must_use]
    pub fn function_names(&self) -> Vec<&str> {
        match self {
            ModuleExports::Named(entries) => entries
                .iter()
                .filter(|(_, value)| value.is_function())
                .map(|(name, _)| name.as_str())
                .collect(),
            ModuleExports::Default(_) => Vec::new(),
        }
    }

    /// Looks up a named export.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExportedValue> {
        match self {
            ModuleExports::Named(entries) => entries.get(name),
            ModuleExports::Default(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn marker() -> Value {
        Value::String(function_marker())
    }

    fn module_with(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    // ---- Predicates ----

    #[test]
    fn named_export_detection() {
        let tree = module_with(vec![("run", marker()), ("version", Value::Int(2))]);
        assert!(has_any_named_function_export(&tree));
        assert!(exports_any_function(&tree));
    }

    #[test]
    fn data_only_mapping_has_no_function() {
        let tree = Value::from(json!({"a": 1, "b": "[[not-a-marker]]"}));
        assert!(!has_any_named_function_export(&tree));
        assert!(!exports_any_function(&tree));
    }

    #[test]
    fn empty_mapping_has_no_function() {
        assert!(!has_any_named_function_export(&Value::Map(BTreeMap::new())));
    }

    #[test]
    fn arrays_and_primitives_are_not_mappings() {
        assert!(!has_any_named_function_export(&Value::Array(vec![marker()])));
        assert!(!has_any_named_function_export(&Value::Null));
        assert!(!has_any_named_function_export(&marker()));
    }

    #[test]
    fn default_export_function_detected() {
        assert!(exports_any_function(&marker()));
        assert!(!exports_any_function(&Value::from("plain")));
    }

    // ---- named_function_exports ----

    #[test]
    fn named_function_exports_returns_only_markers() {
        let tree = module_with(vec![
            ("start", marker()),
            ("config", Value::from(json!({"port": 80}))),
            ("stop", Value::String(function_marker().to_uppercase())),
        ]);
        let exports = named_function_exports(&tree).unwrap();
        assert_eq!(
            exports,
            vec![
                NamedFunctionExport {
                    name: "start".to_string(),
                    body: function_marker(),
                },
                NamedFunctionExport {
                    name: "stop".to_string(),
                    body: function_marker().to_uppercase(),
                },
            ]
        );
    }

    #[test]
    fn named_function_exports_without_markers_fails() {
        let tree = Value::from(json!({"a": 1}));
        assert_eq!(
            named_function_exports(&tree),
            Err(ClassifyError::NoExportedFunction)
        );
        // A default-export function is not a named export.
        assert_eq!(
            named_function_exports(&marker()),
            Err(ClassifyError::NoExportedFunction)
        );
    }

    // ---- to_transport ----

    #[test]
    fn to_transport_replaces_top_level_functions() {
        let tree = module_with(vec![
            ("run", Value::function(|| async { Ok(Value::Null) })),
            ("name", Value::from("svc")),
        ]);
        let sent = to_transport(&tree);
        assert_eq!(
            sent,
            module_with(vec![("run", marker()), ("name", Value::from("svc"))])
        );
        assert!(has_any_named_function_export(&sent));
    }

    #[test]
    fn to_transport_replaces_default_function() {
        let sent = to_transport(&Value::function(|| async { Ok(Value::Null) }));
        assert_eq!(sent, marker());
    }

    #[test]
    fn to_transport_leaves_nested_values() {
        let nested = Value::Array(vec![Value::function(|| async { Ok(Value::Null) })]);
        let tree = module_with(vec![("list", nested.clone())]);
        assert_eq!(to_transport(&tree), module_with(vec![("list", nested)]));
    }

    #[test]
    fn to_transport_looks_through_shared_nodes() {
        let run = Value::function(|| async { Ok(Value::Null) });
        let tree = module_with(vec![("run", Value::shared(run.clone()))]);
        assert_eq!(to_transport(&tree), module_with(vec![("run", marker())]));

        assert_eq!(to_transport(&Value::shared(run.clone())), marker());

        let shared_module = Value::shared(module_with(vec![("run", run)]));
        let sent = to_transport(&shared_module);
        assert_eq!(sent, module_with(vec![("run", marker())]));
        assert!(rmp_serde::to_vec_named(&sent).is_ok());
    }

    // ---- ModuleExports ----

    #[test]
    fn module_exports_from_named_tree() {
        let tree = module_with(vec![
            ("b", marker()),
            ("a", marker()),
            ("data", Value::Int(1)),
        ]);
        let exports = ModuleExports::from_wire(tree);
        assert_eq!(exports.function_names(), vec!["a", "b"]);
        assert!(!exports.has_default_function());
        assert_eq!(
            exports.get("data"),
            Some(&ExportedValue::Plain(Value::Int(1)))
        );
        assert!(exports.get("a").is_some_and(ExportedValue::is_function));
    }

    #[test]
    fn module_exports_from_default_function() {
        let exports = ModuleExports::from_wire(marker());
        assert!(exports.has_default_function());
        assert!(exports.function_names().is_empty());
        assert!(exports.get("anything").is_none());
    }

    #[test]
    fn module_exports_from_plain_default() {
        let exports = ModuleExports::from_wire(Value::Int(5));
        assert_eq!(
            exports,
            ModuleExports::Default(ExportedValue::Plain(Value::Int(5)))
        );
    }
}
