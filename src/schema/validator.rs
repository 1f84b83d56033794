//! Declaration checks run before a schema is initialized.

use crate::error::SchemaError;
use crate::schema::{FieldType, RelationType, Schema};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn identifier_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok()).as_ref()
}

/// Identifiers end up quoted in SQL, but are still restricted to a plain charset.
pub fn is_identifier(s: &str) -> bool {
    identifier_re().is_some_and(|re| re.is_match(s))
}

fn check_identifier(kind: &'static str, name: &str) -> Result<(), SchemaError> {
    if !is_identifier(name) {
        return Err(SchemaError::InvalidIdentifier {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

pub fn validate(schema: &Schema) -> Result<(), SchemaError> {
    check_identifier("schema", &schema.name)?;
    if !schema.namespace.is_empty() {
        check_identifier("namespace", &schema.namespace)?;
    }
    let invalid = |message: String| SchemaError::Invalid {
        schema: schema.name.clone(),
        message,
    };

    let mut seen = HashSet::new();
    for f in &schema.fields {
        check_identifier("field", &f.name)?;
        if !seen.insert(f.name.as_str()) {
            return Err(invalid(format!("duplicate field {}", f.name)));
        }
        if !f.type_.is_valid() {
            return Err(invalid(format!("field {} has an invalid type", f.name)));
        }
        if f.type_ == FieldType::Enum && f.enums.is_empty() {
            return Err(invalid(format!("enum field {} declares no values", f.name)));
        }
        match (&f.relation, f.is_relation()) {
            (None, true) => {
                return Err(invalid(format!("relation field {} has no relation", f.name)));
            }
            (Some(_), false) => {
                return Err(invalid(format!("field {} is {} but declares a relation", f.name, f.type_)));
            }
            (Some(r), true) => {
                if r.type_ == RelationType::Invalid {
                    return Err(invalid(format!("relation field {} has an invalid relation type", f.name)));
                }
                if r.target_schema_name.is_empty() || r.target_field_name.is_empty() {
                    return Err(invalid(format!(
                        "relation field {} must name a target schema and field",
                        f.name
                    )));
                }
            }
            (None, false) => {}
        }
    }

    if !schema.label_field.is_empty() && schema.field(&schema.label_field).is_none() {
        return Err(invalid(format!("label field {} not found", schema.label_field)));
    }
    Ok(())
}
