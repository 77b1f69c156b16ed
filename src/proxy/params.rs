//! Decoding of `ExecuteQuery` parameters.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::backend::{Parameter, ParameterValue};
use crate::error::{Error, ErrorType, Result};
use crate::protocol::decoder::LobPayload;
use crate::protocol::message::ExecuteQuery;
use crate::protocol::types::TypeCode;

use super::info::{CustomType, TypeCatalog};

/// Decode every batch of `query`.
///
/// Blob/Clob values are descriptors referencing LOBs received earlier on the
/// session; custom-typed values must name a registered custom type and
/// satisfy its schema.
pub fn decode_parameters(
    query: &ExecuteQuery,
    lobs: &HashMap<String, LobPayload>,
    catalog: &TypeCatalog,
) -> Result<Vec<Vec<Parameter>>> {
    let customs = custom_types(query, catalog)?;
    query
        .parameters
        .iter()
        .enumerate()
        .map(|(batch, values)| {
            if values.len() != query.parameter_types.len() {
                return Err(Error::recover(
                    ErrorType::InvalidArgument,
                    format!(
                        "Batch {} has {} parameters but {} types were given",
                        batch,
                        values.len(),
                        query.parameter_types.len()
                    ),
                ));
            }
            values
                .iter()
                .zip(&query.parameter_types)
                .zip(&customs)
                .enumerate()
                .map(|(i, ((value, &type_code), &custom))| {
                    if let Some((name, custom)) = custom.filter(|_| !value.is_null()) {
                        custom.validate(value).map_err(|reason| {
                            Error::recover(
                                ErrorType::InvalidArgument,
                                format!(
                                    "Parameter {} does not match the custom type '{}': {}",
                                    i + 1,
                                    name,
                                    reason
                                ),
                            )
                        })?;
                    }
                    Ok(Parameter {
                        type_code,
                        native_type: custom.map(|(_, c)| c.native().to_string()),
                        value: decode_value(type_code, value, lobs)?,
                    })
                })
                .collect()
        })
        .collect()
}

fn custom_types<'a>(
    query: &'a ExecuteQuery,
    catalog: &'a TypeCatalog,
) -> Result<Vec<Option<(&'a str, &'a CustomType)>>> {
    query
        .parameter_types
        .iter()
        .enumerate()
        .map(|(i, &type_code)| {
            let name = query.custom_types.get(i).and_then(Option::as_deref);
            match (type_code, name) {
                (TypeCode::Custom, Some(name)) => catalog
                    .custom_type(name)
                    .map(|custom| Some((name, custom)))
                    .ok_or_else(|| {
                        Error::recover(
                            ErrorType::InvalidArgument,
                            format!("The custom type '{}' is not registered", name),
                        )
                    }),
                (TypeCode::Custom, None) => Err(Error::recover(
                    ErrorType::InvalidArgument,
                    format!("Parameter {} is custom-typed but names no type", i + 1),
                )),
                _ => Ok(None),
            }
        })
        .collect()
}

fn decode_value(
    type_code: TypeCode,
    value: &JsonValue,
    lobs: &HashMap<String, LobPayload>,
) -> Result<ParameterValue> {
    if value.is_null() {
        return Ok(ParameterValue::Null);
    }
    if !type_code.is_lob() {
        return Ok(ParameterValue::Json(value.clone()));
    }
    let Some(id) = value.get("id").and_then(JsonValue::as_str) else {
        return Err(Error::recover(
            ErrorType::InvalidArgument,
            format!("A {} parameter must be a LOB descriptor", type_code.name()),
        ));
    };
    let payload = lobs.get(id).ok_or_else(|| {
        Error::recover(
            ErrorType::InvalidArgument,
            format!("The LOB '{}' was not transferred before the execute", id),
        )
    })?;
    Ok(ParameterValue::Lob {
        id: id.to_string(),
        data: Arc::from(payload.data.as_slice()),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::MemoryBackend;
    use crate::protocol::message::TypeMapping;
    use crate::protocol::types::DataFormat;

    fn query(types: Vec<TypeCode>, parameters: Vec<Vec<JsonValue>>) -> ExecuteQuery {
        ExecuteQuery {
            statement_id: "s".into(),
            cursor_id: "c".into(),
            scrollable: false,
            parameter_types: types,
            custom_types: Vec::new(),
            parameters,
        }
    }

    fn catalog() -> TypeCatalog {
        let backend = MemoryBackend::new()
            .with_native_type("point", json!({"type": "array", "items": {"type": "number"}}))
            .with_native_type(
                "int4",
                json!({"type": "integer", "minimum": -2147483648i64, "maximum": 2147483647}),
            );
        TypeCatalog::new(Arc::new(backend))
    }

    fn register(catalog: &mut TypeCatalog, name: &str, schema: JsonValue) {
        let custom = catalog
            .match_type(&TypeMapping {
                name: name.into(),
                schema: Some(schema),
                keywords: Vec::new(),
            })
            .unwrap();
        catalog.register(name, custom);
    }

    #[test]
    fn decodes_batches() {
        let q = query(
            vec![TypeCode::Integer, TypeCode::VarChar],
            vec![vec![json!(1), json!("a")], vec![json!(2), JsonValue::Null]],
        );
        let batches = decode_parameters(&q, &HashMap::new(), &catalog()).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][1].value, ParameterValue::Json(json!("a")));
        assert_eq!(batches[1][1].value, ParameterValue::Null);
    }

    #[test]
    fn batch_length_must_match_types() {
        let q = query(vec![TypeCode::Integer], vec![vec![json!(1), json!(2)]]);
        let err = decode_parameters(&q, &HashMap::new(), &catalog()).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::InvalidArgument);
    }

    #[test]
    fn lob_parameters_reference_received_payloads() {
        let mut lobs = HashMap::new();
        lobs.insert(
            "BLOB_1".to_string(),
            LobPayload {
                id: "BLOB_1".into(),
                format: DataFormat::Binary,
                data: vec![1, 2, 3],
            },
        );
        let q = query(vec![TypeCode::Blob], vec![vec![json!({"id": "BLOB_1", "size": 3})]]);
        let batches = decode_parameters(&q, &lobs, &catalog()).unwrap();
        assert!(matches!(
            &batches[0][0].value,
            ParameterValue::Lob { id, data } if id == "BLOB_1" && data[..] == [1u8, 2, 3]
        ));

        let missing = query(vec![TypeCode::Clob], vec![vec![json!({"id": "CLOB_9"})]]);
        assert!(decode_parameters(&missing, &lobs, &catalog()).is_err());
    }

    #[test]
    fn custom_types_must_be_registered() {
        let mut catalog = catalog();
        let mut q = query(vec![TypeCode::Custom], vec![vec![json!([1.0, 2.0])]]);
        q.custom_types = vec![Some("Point2D".into())];
        assert!(decode_parameters(&q, &HashMap::new(), &catalog).is_err());

        register(
            &mut catalog,
            "point2d",
            json!({"type": "array", "items": {"type": "number"}, "maxItems": 2}),
        );
        let batches = decode_parameters(&q, &HashMap::new(), &catalog).unwrap();
        assert_eq!(batches[0][0].native_type.as_deref(), Some("point"));
    }

    #[test]
    fn custom_values_must_satisfy_the_schema() {
        let mut catalog = catalog();
        register(
            &mut catalog,
            "Percent",
            json!({"type": "integer", "minimum": 0, "maximum": 100}),
        );
        let mut q = query(
            vec![TypeCode::Integer, TypeCode::Custom],
            vec![vec![json!(1), json!(42)], vec![json!(2), JsonValue::Null]],
        );
        q.custom_types = vec![None, Some("percent".into())];
        let batches = decode_parameters(&q, &HashMap::new(), &catalog).unwrap();
        assert_eq!(batches[0][1].native_type.as_deref(), Some("int4"));
        assert_eq!(batches[1][1].value, ParameterValue::Null);

        q.parameters = vec![vec![json!(1), json!(150)]];
        let err = decode_parameters(&q, &HashMap::new(), &catalog).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::InvalidArgument);
        assert!(err.to_string().contains("Parameter 2 does not match the custom type 'percent'"));
    }
}
