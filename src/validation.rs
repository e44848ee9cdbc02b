//! Schema validation helpers.
//!
//! This module validates a `serde_json::Value` against a [`Schema`]: presence,
//! types, nested block counts and the [`StringRule`]s attached to string
//! attributes. Every problem becomes one [`Diagnostic`] carrying the attribute
//! path, so nothing is sent to Azure until the whole configuration is clean.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_azurerm_eventgrid::schema::{Attribute, Schema, StringRule};
//! use hemmer_provider_azurerm_eventgrid::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0().with_attribute(
//!     "name",
//!     Attribute::required_string().with_rule(StringRule::NotEmpty),
//! );
//!
//! assert!(validate(&schema, &json!({"name": "topic1"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": ""}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("name".to_string()));
//! ```

use crate::azure::resource_id::{validate_resource_group_name, ResourceId};
use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, NestedBlock,
    Schema, StringRule,
};
use crate::timeouts::parse_duration;
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed attributes are skipped (provider sets these)
/// - Attribute types must match the schema
/// - String rules are checked once the type is right
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => {
            // Null is valid for optional blocks, but we can't validate further
            return;
        },
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value)))
                    .with_attribute_if_not_empty(path),
            );
            return;
        },
    };

    // Sorted so diagnostics come out in a stable order
    let mut attributes: Vec<_> = block.attributes.iter().collect();
    attributes.sort_by(|a, b| a.0.cmp(b.0));
    for (name, attr) in attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    let mut blocks: Vec<_> = block.blocks.iter().collect();
    blocks.sort_by(|a, b| a.0.cmp(b.0));
    for (name, nested_block) in blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested_block, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // Skip computed-only attributes (provider sets these)
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            if validate_attribute_type(&attr.attr_type, v, path, diagnostics) {
                if let Some(s) = v.as_str() {
                    validate_rules(&attr.rules, s, path, diagnostics);
                }
            }
        },
    }
}

/// Returns whether the value had the right type.
fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> bool {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
                return false;
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
                return false;
            }
        },
        AttributeType::Map(value_type) => {
            let Some(obj) = value.as_object() else {
                diagnostics.push(type_error(path, "map", value));
                return false;
            };
            let mut ok = true;
            for (key, val) in obj {
                let key_path = format!("{}.{}", path, key);
                ok &= validate_attribute_type(value_type, val, &key_path, diagnostics);
            }
            return ok;
        },
    }
    true
}

fn validate_rules(rules: &[StringRule], value: &str, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    for rule in rules {
        if let Err(detail) = check_rule(rule, value) {
            diagnostics.push(
                Diagnostic::error(format!("Invalid value for attribute '{}'", path))
                    .with_detail(detail)
                    .with_attribute(path),
            );
        }
    }
}

/// Check a single string against a rule.
pub fn check_rule(rule: &StringRule, value: &str) -> Result<(), String> {
    match rule {
        StringRule::NotEmpty => {
            if value.is_empty() {
                return Err("must not be empty".to_string());
            }
        },
        StringRule::Matches { pattern, message } => {
            if !pattern.is_match(value) {
                return Err(format!("{}: got {:?}", message, value));
            }
        },
        StringRule::OneOf {
            values,
            ignore_case,
        } => {
            let found = values.iter().any(|v| {
                if *ignore_case {
                    v.eq_ignore_ascii_case(value)
                } else {
                    *v == value
                }
            });
            if !found {
                return Err(format!(
                    "expected one of [{}], got {:?}",
                    values.join(", "),
                    value
                ));
            }
        },
        StringRule::ResourceId => {
            ResourceId::parse(value).map_err(|e| e.to_string())?;
        },
        StringRule::ResourceGroupName => validate_resource_group_name(value)?,
        StringRule::Duration => {
            parse_duration(value)?;
        },
    }
    Ok(())
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match nested.nesting_mode {
        BlockNestingMode::Single => {
            validate_single_block(nested, value, path, diagnostics);
        },
        BlockNestingMode::List => {
            validate_list_block(nested, value, path, diagnostics);
        },
    }
}

fn validate_single_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required block '{}'", path))
                        .with_detail("At least one block is required")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            validate_block(&nested.block, v, path, diagnostics);
        },
    }
}

fn validate_list_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s)",
                        path, nested.min_items
                    ))
                    .with_attribute(path),
                );
            }
        },
        Some(Value::Array(arr)) => {
            let len = arr.len() as u32;

            if len < nested.min_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s), got {}",
                        path, nested.min_items, len
                    ))
                    .with_attribute(path),
                );
            }

            // max_items of 0 means unlimited
            if nested.max_items > 0 && len > nested.max_items {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' allows at most {} item(s), got {}",
                        path, nested.max_items, len
                    ))
                    .with_attribute(path),
                );
            }

            for (i, item) in arr.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected list for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
        },
    }
}

// Helper functions

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() {
                true
            } else if let Some(f) = n.as_f64() {
                f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
            } else {
                false
            }
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic {
        severity: DiagnosticSeverity::Error,
        summary: format!("Invalid type for attribute '{}'", path),
        detail: Some(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        )),
        attribute: Some(path.to_string()),
    }
}

trait DiagnosticExt {
    fn with_attribute_if_not_empty(self, path: &str) -> Self;
}

impl DiagnosticExt for Diagnostic {
    fn with_attribute_if_not_empty(self, path: &str) -> Self {
        if path.is_empty() {
            self
        } else {
            self.with_attribute(path)
        }
    }
}
