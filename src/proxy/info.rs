//! Information requests and custom type mappings answered by the proxy.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::warn;

use super::schema::{self, SchemaError, SchemaValidator};
use crate::backend::TypeRepository;
use crate::error::{Error, ErrorType, Result};
use crate::protocol::message::{InformationRequest, InformationResponse, TypeMapping};
use crate::protocol::types::{InformationResponseType, InformationSubject, TypeCode};

/// Type knowledge of one session: the backend's native types plus the
/// custom type names the client registered.
pub struct TypeCatalog {
    repository: Arc<dyn TypeRepository>,
    /// Keyed by lowercase custom name
    custom: HashMap<String, CustomType>,
}

/// A registered custom type: the native type carrying it and the schema
/// its values must satisfy.
#[derive(Debug, Clone)]
pub struct CustomType {
    native: String,
    validator: SchemaValidator,
}

impl CustomType {
    pub fn native(&self) -> &str {
        &self.native
    }

    pub fn schema(&self) -> &JsonValue {
        self.validator.schema()
    }

    pub fn validate(&self, value: &JsonValue) -> std::result::Result<(), String> {
        self.validator.validate(value)
    }
}

fn response(response_type: InformationResponseType, value: JsonValue) -> InformationResponse {
    InformationResponse {
        response_type,
        value,
    }
}

fn unknown() -> InformationResponse {
    response(InformationResponseType::Unknown, JsonValue::Null)
}

impl TypeCatalog {
    pub fn new(repository: Arc<dyn TypeRepository>) -> Self {
        Self {
            repository,
            custom: HashMap::new(),
        }
    }

    /// Registered custom type by name, case-insensitive.
    pub fn custom_type(&self, name: &str) -> Option<&CustomType> {
        self.custom.get(&name.to_lowercase())
    }

    /// Native type registered for a custom type name.
    pub fn resolve_custom(&self, name: &str) -> Option<&str> {
        self.custom_type(name).map(CustomType::native)
    }

    pub fn register(&mut self, name: &str, custom: CustomType) {
        self.custom.insert(name.to_lowercase(), custom);
    }

    /// Answer a request the proxy knows about locally. `None` means the
    /// backend has to be asked.
    pub fn answer(&self, request: &InformationRequest) -> Result<Option<InformationResponse>> {
        let answer = match request.subject {
            InformationSubject::SupportsBinaryProtocol => {
                response(InformationResponseType::Boolean, JsonValue::Bool(true))
            }
            InformationSubject::SupportedNativeTypes => response(
                InformationResponseType::TextArray,
                self.repository
                    .native_types()
                    .into_iter()
                    .map(JsonValue::String)
                    .collect(),
            ),
            InformationSubject::TypeSchema => {
                let Some(name) = request.detail.as_deref() else {
                    return Err(Error::recover(
                        ErrorType::InvalidArgument,
                        "A type schema request needs a type name",
                    ));
                };
                response(InformationResponseType::Schema, self.schema_of(name)?)
            }
            InformationSubject::DbmsName
            | InformationSubject::MaxPrecision
            | InformationSubject::MaxScale => return Ok(None),
        };
        Ok(Some(answer))
    }

    fn schema_of(&self, name: &str) -> Result<JsonValue> {
        if let Some(schema) = TypeCode::from_name(name).and_then(TypeCode::schema) {
            return Ok(schema);
        }
        let native = self.resolve_custom(name).unwrap_or(name);
        self.repository.schema(native).ok_or_else(|| {
            Error::recover(
                ErrorType::InformationRequestFailed,
                format!("No schema known for type '{}'", name),
            )
        })
    }

    /// Response for a request the backend could not answer.
    pub fn fallback(subject: InformationSubject, detail: Option<&str>) -> InformationResponse {
        let code = detail.and_then(TypeCode::from_name);
        match (subject, code) {
            (InformationSubject::MaxPrecision, Some(code)) => response(
                InformationResponseType::Integer,
                code.default_precision().into(),
            ),
            (InformationSubject::MaxScale, Some(code)) => response(
                InformationResponseType::Integer,
                code.default_scale().into(),
            ),
            _ => unknown(),
        }
    }

    /// Find the native type a mapping request fits into. Candidates whose
    /// name contains one of the keywords are tried first.
    pub fn match_type(&self, mapping: &TypeMapping) -> Result<CustomType> {
        if mapping.name.is_empty() {
            return Err(Error::recover(
                ErrorType::InvalidArgument,
                "A type mapping needs a name",
            ));
        }
        let Some(schema) = mapping.schema.as_ref() else {
            return Err(Error::recover(
                ErrorType::InvalidArgument,
                format!("The type mapping '{}' has no schema", mapping.name),
            ));
        };
        let validator = SchemaValidator::new(schema.clone()).map_err(not_possible)?;
        let keywords: Vec<String> = mapping.keywords.iter().map(|k| k.to_lowercase()).collect();
        let (mut candidates, rest): (Vec<String>, Vec<String>) = self
            .repository
            .native_types()
            .into_iter()
            .partition(|native| {
                let native = native.to_lowercase();
                keywords.iter().any(|k| native.contains(k.as_str()))
            });
        candidates.extend(rest);

        for native in candidates {
            let Some(native_schema) = self.repository.schema(&native) else {
                warn!(native = %native, "native type without schema");
                continue;
            };
            match schema::is_compatible(schema, &native_schema) {
                Ok(true) => return Ok(CustomType { native, validator }),
                Ok(false) => {}
                Err(SchemaError::InvalidNative(reason)) => {
                    warn!(native = %native, %reason, "skipping native type with invalid schema");
                }
                Err(e @ SchemaError::Invalid(_)) => return Err(not_possible(e)),
            }
        }
        Err(Error::recover(
            ErrorType::TypeMappingNotPossible,
            format!("No native type matches the custom type '{}'", mapping.name),
        ))
    }
}

fn not_possible(e: SchemaError) -> Error {
    Error::recover(ErrorType::TypeMappingNotPossible, e.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::MemoryBackend;

    fn catalog() -> TypeCatalog {
        let backend = MemoryBackend::new()
            .with_native_type("box", json!({"type": "array", "items": {"type": "number"}}))
            .with_native_type("point", json!({"type": "array", "items": {"type": "number"}}))
            .with_native_type("inet", json!({"type": "string", "format": "ipv4"}));
        TypeCatalog::new(Arc::new(backend))
    }

    fn request(subject: InformationSubject, detail: Option<&str>) -> InformationRequest {
        InformationRequest {
            subject,
            detail: detail.map(str::to_string),
        }
    }

    #[test]
    fn answers_locally_known_subjects() {
        let c = catalog();
        let binary = c
            .answer(&request(InformationSubject::SupportsBinaryProtocol, None))
            .unwrap()
            .unwrap();
        assert_eq!(binary.value, json!(true));

        let types = c
            .answer(&request(InformationSubject::SupportedNativeTypes, None))
            .unwrap()
            .unwrap();
        assert_eq!(types.value, json!(["box", "point", "inet"]));

        let schema = c
            .answer(&request(InformationSubject::TypeSchema, Some("inet")))
            .unwrap()
            .unwrap();
        assert_eq!(schema.response_type, InformationResponseType::Schema);

        assert!(
            c.answer(&request(InformationSubject::DbmsName, None))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn fallback_uses_type_defaults() {
        let r = TypeCatalog::fallback(InformationSubject::MaxPrecision, Some("BigInt"));
        assert_eq!(r.value, json!(8));
        let r = TypeCatalog::fallback(InformationSubject::MaxScale, Some("nosuch"));
        assert_eq!(r.response_type, InformationResponseType::Unknown);
    }

    #[test]
    fn keywords_pick_the_candidate() {
        let mut c = catalog();
        let mapping = TypeMapping {
            name: "Point2D".into(),
            schema: Some(json!({"type": "array", "items": {"type": "number"}})),
            keywords: vec!["POINT".into()],
        };
        let custom = c.match_type(&mapping).unwrap();
        assert_eq!(custom.native(), "point");
        c.register(&mapping.name, custom);
        assert_eq!(c.resolve_custom("point2d"), Some("point"));
    }

    #[test]
    fn subrange_maps_to_wider_native_type() {
        let backend = MemoryBackend::new()
            .with_native_type("bool", json!({"type": "boolean"}))
            .with_native_type("int2", json!({"type": "integer", "minimum": -32768, "maximum": 32767}))
            .with_native_type(
                "int4",
                json!({"type": "integer", "minimum": -2147483648i64, "maximum": 2147483647}),
            );
        let c = TypeCatalog::new(Arc::new(backend));
        let percent = TypeMapping {
            name: "Percent".into(),
            schema: Some(json!({"type": "integer", "minimum": 0, "maximum": 100})),
            keywords: vec!["int".into()],
        };
        let custom = c.match_type(&percent).unwrap();
        // int2 comes first and already holds 0..=100
        assert_eq!(custom.native(), "int2");
        assert!(custom.validate(&json!(100)).is_ok());
        assert!(custom.validate(&json!(101)).is_err());

        let wide = TypeMapping {
            name: "Wide".into(),
            schema: Some(json!({"type": "integer", "minimum": 0, "maximum": 100000})),
            keywords: vec!["int".into()],
        };
        assert_eq!(c.match_type(&wide).unwrap().native(), "int4");
    }

    #[test]
    fn percent_maps_to_int4() {
        let backend = MemoryBackend::new().with_native_type(
            "int4",
            json!({"type": "integer", "minimum": -2147483648i64, "maximum": 2147483647}),
        );
        let c = TypeCatalog::new(Arc::new(backend));
        let custom = c
            .match_type(&TypeMapping {
                name: "Percent".into(),
                schema: Some(json!({"type": "integer", "minimum": 0, "maximum": 100})),
                keywords: vec!["int".into()],
            })
            .unwrap();
        assert_eq!(custom.native(), "int4");
    }

    #[test]
    fn invalid_schemas() {
        let backend = MemoryBackend::new()
            .with_native_type("broken", json!({"minimum": 0}))
            .with_native_type("text", json!({"type": "string"}));
        let c = TypeCatalog::new(Arc::new(backend));
        // the broken native schema is skipped
        let custom = c
            .match_type(&TypeMapping {
                name: "name".into(),
                schema: Some(json!({"type": "string", "maxLength": 10})),
                keywords: Vec::new(),
            })
            .unwrap();
        assert_eq!(custom.native(), "text");

        let err = c
            .match_type(&TypeMapping {
                name: "name".into(),
                schema: Some(json!({"maxLength": 10})),
                keywords: Vec::new(),
            })
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::TypeMappingNotPossible);
        assert!(err.to_string().contains("seems to be invalid"));
    }

    #[test]
    fn unmatched_schema_is_not_possible() {
        let c = catalog();
        let err = c
            .match_type(&TypeMapping {
                name: "x".into(),
                schema: Some(json!({"type": "boolean"})),
                keywords: Vec::new(),
            })
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::TypeMappingNotPossible);
        let err = c
            .match_type(&TypeMapping {
                name: "x".into(),
                schema: None,
                keywords: Vec::new(),
            })
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::InvalidArgument);
    }
}
