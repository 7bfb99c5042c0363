//! JSON Schema validation for catalog and data documents.
//!
//! Covers the keyword subset the store documents use: `type`, `enum`, `const`,
//! `properties`, `required`, `additionalProperties`, `items`, `minItems`,
//! `maxItems`, `minimum`, `maximum`, `minLength`, `allOf`, `anyOf`, `oneOf`,
//! `not` and `$ref`. Remote references are resolved only from preloaded
//! documents; nothing is fetched.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

const MAX_REF_DEPTH: usize = 64;

static ACCEPT_ALL: Value = Value::Bool(true);

pub const DEFAULT_CATALOG_SCHEMA: &str = r##"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "title": "Store catalog",
  "type": "array",
  "items": {
    "type": "object",
    "required": ["Id", "Name", "FirstMessageOriginatingTime", "LastMessageOriginatingTime"],
    "properties": {
      "Id": { "type": "integer", "minimum": 1 },
      "Name": { "type": "string", "minLength": 1 },
      "TypeName": { "type": ["string", "null"] },
      "PartitionName": { "type": ["string", "null"] },
      "MessageCount": { "type": "integer", "minimum": 0 },
      "FirstMessageTime": { "type": "integer" },
      "LastMessageTime": { "type": "integer" },
      "FirstMessageOriginatingTime": { "type": "integer" },
      "LastMessageOriginatingTime": { "type": "integer" }
    }
  }
}"##;

pub const DEFAULT_DATA_SCHEMA: &str = r##"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "title": "Store data",
  "type": "array",
  "items": {
    "type": "object",
    "required": ["Envelope", "Data"],
    "additionalProperties": false,
    "properties": {
      "Envelope": { "$ref": "#/definitions/Envelope" },
      "Data": {}
    }
  },
  "definitions": {
    "Envelope": {
      "type": "object",
      "required": ["SourceId", "SequenceId", "OriginatingTime", "Time"],
      "properties": {
        "SourceId": { "type": "integer", "minimum": 1 },
        "SequenceId": { "type": "integer", "minimum": 0 },
        "OriginatingTime": { "type": "integer" },
        "Time": { "type": "integer" }
      }
    }
  }
}"##;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid schema {name}: {message}")]
    InvalidSchema { name: String, message: String },
    #[error("unresolved schema reference {reference}")]
    UnresolvedRef { reference: String },
    #[error("{path}: {message}")]
    Violation { path: String, message: String },
}

/// Preloaded schema documents keyed by reference URI.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    documents: HashMap<String, Arc<Value>>,
}

impl SchemaRegistry {
    pub fn from_texts(texts: &BTreeMap<String, String>) -> Result<Self, ValidationError> {
        let mut documents = HashMap::with_capacity(texts.len());
        for (uri, text) in texts {
            let doc = parse_schema(uri, text)?;
            documents.insert(normalize_uri(uri).to_string(), Arc::new(doc));
        }
        Ok(Self { documents })
    }

    fn get(&self, uri: &str) -> Option<&Arc<Value>> {
        self.documents.get(normalize_uri(uri))
    }
}

/// A compiled schema: a document plus a JSON pointer to the node in force.
#[derive(Debug, Clone)]
pub struct Schema {
    doc: Arc<Value>,
    pointer: String,
    registry: Arc<SchemaRegistry>,
}

impl Schema {
    pub fn compile(
        name: &str,
        text: &str,
        registry: Arc<SchemaRegistry>,
    ) -> Result<Self, ValidationError> {
        let doc = parse_schema(name, text)?;
        Ok(Self {
            doc: Arc::new(doc),
            pointer: String::new(),
            registry,
        })
    }

    /// Schema applied to each element of the validated array.
    ///
    /// `$ref`s on the path to `items` are followed through the registry. A
    /// schema that puts no constraint on items projects to accept-all.
    pub fn item_schema(&self) -> Result<Schema, ValidationError> {
        let mut doc = Arc::clone(&self.doc);
        let mut pointer = self.pointer.clone();
        for _ in 0..MAX_REF_DEPTH {
            let node = doc.pointer(&pointer).ok_or_else(|| ValidationError::UnresolvedRef {
                reference: format!("#{pointer}"),
            })?;
            let Value::Object(keywords) = node else {
                return Ok(self.accept_all());
            };
            if let Some(items) = keywords.get("items") {
                if !(items.is_object() || items.is_boolean()) {
                    return Err(unprojectable("tuple-form items cannot describe a single record"));
                }
                return Ok(Schema {
                    doc,
                    pointer: format!("{pointer}/items"),
                    registry: Arc::clone(&self.registry),
                });
            }
            match keywords.get("$ref") {
                Some(Value::String(reference)) => {
                    let reference = reference.clone();
                    let (base, fragment) = reference
                        .split_once('#')
                        .unwrap_or((reference.as_str(), ""));
                    if !base.is_empty() {
                        let target = self.registry.get(base).ok_or_else(|| {
                            ValidationError::UnresolvedRef {
                                reference: reference.clone(),
                            }
                        })?;
                        doc = Arc::clone(target);
                    }
                    pointer = fragment.to_string();
                }
                _ if ["allOf", "anyOf", "oneOf"]
                    .iter()
                    .any(|key| keywords.contains_key(*key)) =>
                {
                    return Err(unprojectable("items hidden behind a combinator"));
                }
                _ => return Ok(self.accept_all()),
            }
        }
        Err(unprojectable("reference chain too deep"))
    }

    fn accept_all(&self) -> Schema {
        Schema {
            doc: Arc::new(ACCEPT_ALL.clone()),
            pointer: String::new(),
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let node = self.doc.pointer(&self.pointer).unwrap_or(&ACCEPT_ALL);
        let mut validator = Validator {
            registry: &self.registry,
            depth: 0,
        };
        validator.validate(value, node, &self.doc, "$")
    }
}

struct Validator<'r> {
    registry: &'r SchemaRegistry,
    depth: usize,
}

impl Validator<'_> {
    fn validate(
        &mut self,
        value: &Value,
        schema: &Value,
        doc: &Arc<Value>,
        path: &str,
    ) -> Result<(), ValidationError> {
        let keywords = match schema {
            Value::Bool(true) => return Ok(()),
            Value::Bool(false) => return Err(violation(path, "schema rejects every value")),
            Value::Object(map) => map,
            _ => return Ok(()),
        };

        if let Some(Value::String(reference)) = keywords.get("$ref") {
            self.validate_ref(value, reference, doc, path)?;
        }

        if let Some(expected) = keywords.get("type") {
            check_type(value, expected, path)?;
        }

        if let Some(Value::Array(options)) = keywords.get("enum") {
            if !options.iter().any(|option| option == value) {
                return Err(violation(path, "value is not one of the enumerated options"));
            }
        }

        if let Some(expected) = keywords.get("const") {
            if expected != value {
                return Err(violation(path, format!("expected constant {expected}")));
            }
        }

        if let Value::Object(object) = value {
            if let Some(Value::Array(required)) = keywords.get("required") {
                for key in required.iter().filter_map(Value::as_str) {
                    if !object.contains_key(key) {
                        return Err(violation(path, format!("missing required property {key}")));
                    }
                }
            }
            let properties = keywords.get("properties").and_then(Value::as_object);
            for (key, child) in object {
                let child_path = format!("{path}.{key}");
                match properties.and_then(|props| props.get(key)) {
                    Some(child_schema) => self.validate(child, child_schema, doc, &child_path)?,
                    None => match keywords.get("additionalProperties") {
                        Some(Value::Bool(false)) => {
                            return Err(violation(path, format!("unexpected property {key}")));
                        }
                        Some(extra @ Value::Object(_)) => {
                            self.validate(child, extra, doc, &child_path)?
                        }
                        _ => {}
                    },
                }
            }
        }

        if let Value::Array(items) = value {
            if let Some(min) = keywords.get("minItems").and_then(Value::as_u64) {
                if (items.len() as u64) < min {
                    return Err(violation(path, format!("expected at least {min} items")));
                }
            }
            if let Some(max) = keywords.get("maxItems").and_then(Value::as_u64) {
                if items.len() as u64 > max {
                    return Err(violation(path, format!("expected at most {max} items")));
                }
            }
            match keywords.get("items") {
                Some(Value::Array(tuple)) => {
                    for (index, (item, item_schema)) in items.iter().zip(tuple).enumerate() {
                        self.validate(item, item_schema, doc, &format!("{path}[{index}]"))?;
                    }
                }
                Some(item_schema) => {
                    for (index, item) in items.iter().enumerate() {
                        self.validate(item, item_schema, doc, &format!("{path}[{index}]"))?;
                    }
                }
                None => {}
            }
        }

        if let Some(number) = value.as_f64() {
            if let Some(min) = keywords.get("minimum").and_then(Value::as_f64) {
                if number < min {
                    return Err(violation(path, format!("{number} is below minimum {min}")));
                }
            }
            if let Some(max) = keywords.get("maximum").and_then(Value::as_f64) {
                if number > max {
                    return Err(violation(path, format!("{number} is above maximum {max}")));
                }
            }
        }

        if let Some(text) = value.as_str() {
            if let Some(min) = keywords.get("minLength").and_then(Value::as_u64) {
                if (text.chars().count() as u64) < min {
                    return Err(violation(path, format!("string shorter than {min}")));
                }
            }
        }

        if let Some(Value::Array(all)) = keywords.get("allOf") {
            for sub in all {
                self.validate(value, sub, doc, path)?;
            }
        }

        if let Some(Value::Array(any)) = keywords.get("anyOf") {
            let mut matched = false;
            for sub in any {
                if self.matches(value, sub, doc, path)? {
                    matched = true;
                    break;
                }
            }
            if !matched {
                return Err(violation(path, "value matches none of anyOf"));
            }
        }

        if let Some(Value::Array(one)) = keywords.get("oneOf") {
            let mut count = 0;
            for sub in one {
                if self.matches(value, sub, doc, path)? {
                    count += 1;
                }
            }
            if count != 1 {
                return Err(violation(
                    path,
                    format!("value matches {count} oneOf branches, expected exactly 1"),
                ));
            }
        }

        if let Some(not) = keywords.get("not") {
            if self.matches(value, not, doc, path)? {
                return Err(violation(path, "value matches a forbidden schema"));
            }
        }

        Ok(())
    }

    /// Like `validate`, but a violation is a `false` rather than an error.
    /// Unresolvable references still fail.
    fn matches(
        &mut self,
        value: &Value,
        schema: &Value,
        doc: &Arc<Value>,
        path: &str,
    ) -> Result<bool, ValidationError> {
        match self.validate(value, schema, doc, path) {
            Ok(()) => Ok(true),
            Err(ValidationError::Violation { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn validate_ref(
        &mut self,
        value: &Value,
        reference: &str,
        doc: &Arc<Value>,
        path: &str,
    ) -> Result<(), ValidationError> {
        let unresolved = || ValidationError::UnresolvedRef {
            reference: reference.to_string(),
        };
        if self.depth >= MAX_REF_DEPTH {
            return Err(unresolved());
        }

        let (base, fragment) = match reference.split_once('#') {
            Some((base, fragment)) => (base, fragment),
            None => (reference, ""),
        };
        let target_doc = if base.is_empty() {
            Arc::clone(doc)
        } else {
            Arc::clone(self.registry.get(base).ok_or_else(unresolved)?)
        };
        let node = if fragment.is_empty() {
            target_doc.as_ref()
        } else {
            target_doc.pointer(fragment).ok_or_else(unresolved)?
        };

        self.depth += 1;
        let result = self.validate(value, node, &target_doc, path);
        self.depth -= 1;
        result
    }
}

fn check_type(value: &Value, expected: &Value, path: &str) -> Result<(), ValidationError> {
    let accepted = match expected {
        Value::String(name) => type_matches(value, name),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| type_matches(value, name)),
        _ => true,
    };
    if accepted {
        Ok(())
    } else {
        Err(violation(
            path,
            format!("expected type {expected}, found {}", type_name(value)),
        ))
    }
}

fn type_matches(value: &Value, name: &str) -> bool {
    match name {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
        }
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn violation(path: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::Violation {
        path: path.to_string(),
        message: message.into(),
    }
}

fn unprojectable(message: &str) -> ValidationError {
    ValidationError::InvalidSchema {
        name: "data".to_string(),
        message: format!("cannot derive the record schema: {message}"),
    }
}

fn parse_schema(name: &str, text: &str) -> Result<Value, ValidationError> {
    serde_json::from_str(text).map_err(|err| ValidationError::InvalidSchema {
        name: name.to_string(),
        message: err.to_string(),
    })
}

fn normalize_uri(uri: &str) -> &str {
    uri.trim_end_matches('#')
}
