//! Record schemas
//!
//! A [`RecordSchema`] turns a [`RawItem`] into a validated record or rejects it
//! with a [`ValidationError`] listing every offending field. Validation is pure:
//! no I/O, no shared state.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cardkit::schema::{RecordSchema, Typed};
//! use cardkit::types::NumberCardRecord;
//! use serde_json::json;
//!
//! let schema = Typed::<NumberCardRecord>::new();
//! let record = schema.validate(json!({
//!     "card_id": "revenue",
//!     "report_id": "q3",
//!     "data": { "value": 12.5 }
//! }))?;
//! assert_eq!(record.kind, "number");
//! ```

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::{FieldError, ValidationError};
use crate::types::{CardData, CardRecord, QueryMetadata, RawItem};

/// Validates raw handler output into records.
pub trait RecordSchema: Send + Sync + 'static {
    /// The validated output unit.
    type Record: Serialize + Send + 'static;

    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Validate one raw item.
    fn validate(&self, raw: RawItem) -> Result<Self::Record, ValidationError>;
}

impl<S: RecordSchema> RecordSchema for std::sync::Arc<S> {
    type Record = S::Record;

    fn name(&self) -> &str {
        (**self).name()
    }

    fn validate(&self, raw: RawItem) -> Result<Self::Record, ValidationError> {
        (**self).validate(raw)
    }
}

fn short_type_name<T>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Schema backed by a Rust type: serde for shape, `validator` for constraints.
pub struct Typed<T> {
    name: String,
    _record: PhantomData<fn() -> T>,
}

impl<T> Typed<T> {
    /// Schema named after the record type.
    pub fn new() -> Self {
        Self::named(short_type_name::<T>())
    }

    /// Schema with an explicit diagnostic name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _record: PhantomData,
        }
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Typed<T> {
    fn clone(&self) -> Self {
        Self::named(self.name.clone())
    }
}

impl<T> std::fmt::Debug for Typed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Typed").field("name", &self.name).finish()
    }
}

impl<T> RecordSchema for Typed<T>
where
    T: DeserializeOwned + Serialize + Validate + Send + 'static,
{
    type Record = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, raw: RawItem) -> Result<T, ValidationError> {
        let record: T = serde_path_to_error::deserialize(raw).map_err(|e| {
            ValidationError::new(&self.name).with_field(deserialize_path(&e), e.inner().to_string())
        })?;
        record.validate().map_err(|errors| {
            let mut err = ValidationError::new(&self.name);
            collect_violations("", &errors, &mut err.fields);
            err.fields.sort_by(|a, b| a.path.cmp(&b.path));
            err
        })?;
        Ok(record)
    }
}

// A missing field is reported at its parent; serde only names it in the message.
fn deserialize_path(error: &serde_path_to_error::Error<serde_json::Error>) -> String {
    let parent = match error.path().to_string() {
        root if root == "." => None,
        path => Some(path),
    };
    let message = error.inner().to_string();
    let missing = message
        .strip_prefix("missing field `")
        .and_then(|rest| rest.split('`').next());
    match (parent, missing) {
        (Some(parent), Some(field)) => format!("{parent}.{field}"),
        (Some(parent), None) => parent,
        (None, Some(field)) => field.to_string(),
        (None, None) => "$".to_string(),
    }
}

fn collect_violations(prefix: &str, errors: &ValidationErrors, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(violations) => {
                for violation in violations {
                    let message = violation
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| violation.code.to_string());
                    out.push(FieldError::new(path.clone(), message));
                }
            }
            ValidationErrorsKind::Struct(nested) => collect_violations(&path, nested, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_violations(&format!("{path}[{index}]"), nested, out);
                }
            }
        }
    }
}

/// Validates a [`CardRecord`] and emits its flattened wire record
/// (see [`CardRecord::to_record`]).
pub struct FlatCard<D, M = QueryMetadata> {
    inner: Typed<CardRecord<D, M>>,
}

impl<D, M> FlatCard<D, M> {
    /// Create a flattening card schema.
    pub fn new() -> Self {
        Self {
            inner: Typed::named(short_type_name::<D>()),
        }
    }
}

impl<D, M> Default for FlatCard<D, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, M> RecordSchema for FlatCard<D, M>
where
    D: CardData,
    M: DeserializeOwned + Serialize + Validate + Send + 'static,
{
    type Record = serde_json::Value;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn validate(&self, raw: RawItem) -> Result<Self::Record, ValidationError> {
        let record = self.inner.validate(raw)?;
        record
            .to_record()
            .map_err(|e| ValidationError::new(self.name()).with_field("$", e.to_string()))
    }
}

/// Passes items through untouched, for routes that declare no schema.
#[derive(Debug, Clone, Default)]
pub struct Unchecked;

impl RecordSchema for Unchecked {
    type Record = serde_json::Value;

    fn name(&self) -> &str {
        "unchecked"
    }

    fn validate(&self, raw: RawItem) -> Result<Self::Record, ValidationError> {
        Ok(raw)
    }
}

/// Schema backed by a JSON Schema document, compiled once.
#[cfg(feature = "schema")]
pub struct JsonSchema {
    name: String,
    validator: jsonschema::Validator,
}

#[cfg(feature = "schema")]
impl JsonSchema {
    /// Compile a JSON Schema.
    ///
    /// ## Returns
    ///
    /// - `Ok(JsonSchema)` if the schema is valid
    /// - `Err(CardError::SchemaCompilation)` if the schema is invalid
    pub fn new(name: impl Into<String>, schema: &serde_json::Value) -> crate::error::Result<Self> {
        let validator = jsonschema::validator_for(schema).map_err(|e| {
            crate::error::CardError::SchemaCompilation(format!("Invalid JSON Schema: {}", e))
        })?;
        Ok(Self {
            name: name.into(),
            validator,
        })
    }

    /// Check an instance without building diagnostics.
    pub fn is_valid(&self, instance: &serde_json::Value) -> bool {
        self.validator.is_valid(instance)
    }
}

#[cfg(feature = "schema")]
impl RecordSchema for JsonSchema {
    type Record = serde_json::Value;

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, raw: RawItem) -> Result<Self::Record, ValidationError> {
        let fields: Vec<FieldError> = self
            .validator
            .iter_errors(&raw)
            .map(|err| {
                let path = err.instance_path.to_string();
                let path = if path.is_empty() { "$".to_string() } else { path };
                FieldError::new(path, err.to_string())
            })
            .collect();

        if fields.is_empty() {
            Ok(raw)
        } else {
            Err(ValidationError {
                schema: self.name.clone(),
                fields,
            })
        }
    }
}
