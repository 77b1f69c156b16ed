//! JSON schemas of custom types.
//!
//! [`is_compatible`] decides whether a custom schema fits into the schema
//! of a native type: every keyword the native schema restricts has to be
//! restricted at least as tightly by the custom one. [`SchemaValidator`]
//! checks bound values against a registered custom schema.

use std::collections::HashMap;

use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// A schema that cannot be compared or compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The custom schema is malformed
    #[error("The provided schema seems to be invalid: {0}")]
    Invalid(String),
    /// The native schema is malformed
    #[error("The native schema seems to be invalid: {0}")]
    InvalidNative(String),
}

type Compat = Result<bool, SchemaError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonType {
    Boolean,
    Number,
    Integer,
    String,
    Object,
    Array,
    Null,
}

impl JsonType {
    fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "boolean" => Some(JsonType::Boolean),
            "number" => Some(JsonType::Number),
            "integer" => Some(JsonType::Integer),
            "string" => Some(JsonType::String),
            "object" => Some(JsonType::Object),
            "array" => Some(JsonType::Array),
            "null" => Some(JsonType::Null),
            _ => None,
        }
    }

    fn of(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => JsonType::Null,
            JsonValue::Bool(_) => JsonType::Boolean,
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => JsonType::Integer,
            JsonValue::Number(n) if n.as_f64().is_some_and(|f| f.fract() == 0.0) => {
                JsonType::Integer
            }
            JsonValue::Number(_) => JsonType::Number,
            JsonValue::String(_) => JsonType::String,
            JsonValue::Array(_) => JsonType::Array,
            JsonValue::Object(_) => JsonType::Object,
        }
    }

    fn name(self) -> &'static str {
        match self {
            JsonType::Boolean => "boolean",
            JsonType::Number => "number",
            JsonType::Integer => "integer",
            JsonType::String => "string",
            JsonType::Object => "object",
            JsonType::Array => "array",
            JsonType::Null => "null",
        }
    }

    /// Whether every value of `self` is a value of `other`.
    fn fits(self, other: Self) -> bool {
        self == other || (self == JsonType::Integer && other == JsonType::Number)
    }
}

fn roughly_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

fn is_multiple(value: f64, step: f64) -> bool {
    let quotient = value / step;
    roughly_equal(quotient, quotient.round())
}

/// Whether every value accepted by `custom` is accepted by `native`.
pub fn is_compatible(custom: &JsonValue, native: &JsonValue) -> Compat {
    let Some(custom) = custom.as_object() else {
        return Err(SchemaError::Invalid("The schema is not an object".into()));
    };
    let Some(type_name) = custom.get("type").and_then(JsonValue::as_str) else {
        return Err(SchemaError::Invalid(
            "The schema doesn't contain a type field".into(),
        ));
    };
    let Some(ty) = JsonType::parse(type_name) else {
        return Err(SchemaError::Invalid(format!("Invalid type '{}'", type_name)));
    };
    let Some(native) = native.as_object() else {
        return Err(SchemaError::InvalidNative("The schema is not an object".into()));
    };
    let Some(native_type) = native.get("type").and_then(JsonValue::as_str) else {
        return Err(SchemaError::InvalidNative(format!(
            "Type field is not set. Expected type '{}'.",
            ty.name()
        )));
    };
    if !JsonType::parse(native_type).is_some_and(|other| ty.fits(other)) {
        return Ok(false);
    }

    let fields = Fields { custom, native };
    let compatible = match ty {
        JsonType::Integer | JsonType::Number => {
            fields.same("format")
                && fields.multiple_of()
                && fields.upper("maximum", "exclusiveMaximum")
                && fields.lower("minimum", "exclusiveMinimum")
        }
        JsonType::String => {
            fields.same("format")
                && fields.at_most("maxLength")
                && fields.at_least("minLength")
                && fields.same("pattern")
        }
        JsonType::Array => {
            fields.same("format")
                && fields.at_most("maxItems")
                && fields.at_least("minItems")
                && fields.flag("uniqueItems")
                && items_compatible(custom, native)?
        }
        JsonType::Object => fields.same("format") && properties_compatible(custom, native)?,
        JsonType::Boolean | JsonType::Null => true,
    };
    Ok(compatible)
}

/// Keyword comparison of two schema objects.
struct Fields<'a> {
    custom: &'a Map<String, JsonValue>,
    native: &'a Map<String, JsonValue>,
}

impl Fields<'_> {
    /// A keyword the native schema leaves out restricts nothing; one the
    /// custom schema leaves out allows more than the native schema.
    fn check(&self, key: &str, tighter: impl Fn(&JsonValue, &JsonValue) -> bool) -> bool {
        match (self.custom.get(key), self.native.get(key)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(mine), Some(theirs)) => tighter(mine, theirs),
        }
    }

    fn same(&self, key: &str) -> bool {
        self.check(key, |mine, theirs| mine == theirs)
    }

    fn numbers(
        mine: &JsonValue,
        theirs: &JsonValue,
        cmp: impl Fn(f64, f64) -> bool,
    ) -> bool {
        match (mine.as_f64(), theirs.as_f64()) {
            (Some(mine), Some(theirs)) => cmp(mine, theirs),
            _ => false,
        }
    }

    fn at_most(&self, key: &str) -> bool {
        self.check(key, |mine, theirs| Self::numbers(mine, theirs, |a, b| a <= b))
    }

    fn at_least(&self, key: &str) -> bool {
        self.check(key, |mine, theirs| Self::numbers(mine, theirs, |a, b| a >= b))
    }

    fn flag(&self, key: &str) -> bool {
        self.check(key, |mine, theirs| {
            !theirs.as_bool().unwrap_or(false) || mine.as_bool().unwrap_or(false)
        })
    }

    /// Every multiple of the custom step is a multiple of the native one.
    fn multiple_of(&self) -> bool {
        self.check("multipleOf", |mine, theirs| {
            Self::numbers(mine, theirs, |a, b| b > 0.0 && is_multiple(a, b))
        })
    }

    fn exclusive(schema: &Map<String, JsonValue>, key: &str) -> bool {
        schema.get(key).and_then(JsonValue::as_bool).unwrap_or(false)
    }

    /// Equal bounds are fine unless only the native one is exclusive.
    fn bound(&self, key: &str, exclusive_key: &str, inside: impl Fn(f64, f64) -> bool) -> bool {
        self.check(key, |mine, theirs| {
            Self::numbers(mine, theirs, |a, b| {
                if roughly_equal(a, b) {
                    Self::exclusive(self.custom, exclusive_key)
                        || !Self::exclusive(self.native, exclusive_key)
                } else {
                    inside(a, b)
                }
            })
        })
    }

    fn upper(&self, key: &str, exclusive_key: &str) -> bool {
        self.bound(key, exclusive_key, |a, b| a < b)
    }

    fn lower(&self, key: &str, exclusive_key: &str) -> bool {
        self.bound(key, exclusive_key, |a, b| a > b)
    }
}

/// `additionalItems` of an array schema.
#[derive(Clone, Copy)]
enum Additional<'a> {
    Any,
    Nothing,
    Schema(&'a JsonValue),
}

impl<'a> Additional<'a> {
    fn of(schema: &'a Map<String, JsonValue>) -> Self {
        match schema.get("additionalItems") {
            None | Some(JsonValue::Bool(true)) => Additional::Any,
            Some(JsonValue::Bool(false)) => Additional::Nothing,
            Some(other) if other.is_object() => Additional::Schema(other),
            Some(_) => Additional::Any,
        }
    }

    /// Whether extra items allowed here all fit `schema`.
    fn fits_schema(self, schema: &JsonValue) -> Compat {
        match self {
            Additional::Any => Ok(false),
            Additional::Nothing => Ok(true),
            Additional::Schema(mine) => is_compatible(mine, schema),
        }
    }

    fn fits(self, other: Additional<'_>) -> Compat {
        match (self, other) {
            (Additional::Nothing, _) | (_, Additional::Any) => Ok(true),
            (Additional::Any, _) | (_, Additional::Nothing) => Ok(false),
            (Additional::Schema(mine), Additional::Schema(theirs)) => is_compatible(mine, theirs),
        }
    }
}

fn all_compatible<'a>(pairs: impl IntoIterator<Item = (&'a JsonValue, &'a JsonValue)>) -> Compat {
    for (mine, theirs) in pairs {
        if !is_compatible(mine, theirs)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn items_compatible(custom: &Map<String, JsonValue>, native: &Map<String, JsonValue>) -> Compat {
    let Some(native_items) = native.get("items") else {
        return Ok(true);
    };
    if !native_items.is_object() && !native_items.is_array() {
        return Err(SchemaError::InvalidNative(
            "'items' field is neither an object, nor an array".into(),
        ));
    }
    let Some(items) = custom.get("items") else {
        return Ok(false);
    };
    let additional = Additional::of(custom);
    let native_additional = Additional::of(native);

    match (items, native_items) {
        (JsonValue::Object(_), JsonValue::Object(_)) => is_compatible(items, native_items),
        (JsonValue::Object(_), JsonValue::Array(theirs)) => {
            let max_items = custom
                .get("maxItems")
                .and_then(JsonValue::as_u64)
                .and_then(|n| usize::try_from(n).ok());
            let checked = max_items.map_or(theirs.len(), |max| max.min(theirs.len()));
            if !all_compatible(theirs[..checked].iter().map(|t| (items, t)))? {
                return Ok(false);
            }
            if matches!(native_additional, Additional::Any)
                || max_items.is_some_and(|max| max <= theirs.len())
            {
                return Ok(true);
            }
            match native_additional {
                Additional::Schema(schema) => is_compatible(items, schema),
                _ => Ok(false),
            }
        }
        (JsonValue::Array(mine), JsonValue::Object(_)) => {
            if !all_compatible(mine.iter().map(|m| (m, native_items)))? {
                return Ok(false);
            }
            additional.fits_schema(native_items)
        }
        (JsonValue::Array(mine), JsonValue::Array(theirs)) => {
            if !all_compatible(mine.iter().zip(theirs))? {
                return Ok(false);
            }
            if theirs.len() >= mine.len() {
                for extra in &theirs[mine.len()..] {
                    if !additional.fits_schema(extra)? {
                        return Ok(false);
                    }
                }
                return additional.fits(native_additional);
            }
            match native_additional {
                Additional::Any => Ok(true),
                Additional::Nothing => Ok(false),
                Additional::Schema(schema) => {
                    if !all_compatible(mine[theirs.len()..].iter().map(|m| (m, schema)))? {
                        return Ok(false);
                    }
                    additional.fits_schema(schema)
                }
            }
        }
        _ => Err(SchemaError::Invalid(
            "'items' field is neither an object, nor an array".into(),
        )),
    }
}

fn required(schema: &Map<String, JsonValue>) -> Vec<&str> {
    schema
        .get("required")
        .and_then(JsonValue::as_array)
        .map(|names| names.iter().filter_map(JsonValue::as_str).collect())
        .unwrap_or_default()
}

fn properties_compatible(
    custom: &Map<String, JsonValue>,
    native: &Map<String, JsonValue>,
) -> Compat {
    let mine_required = required(custom);
    if !required(native).iter().all(|name| mine_required.contains(name)) {
        return Ok(false);
    }
    let Some(theirs) = native.get("properties").and_then(JsonValue::as_object) else {
        return Ok(true);
    };
    let mine = custom.get("properties").and_then(JsonValue::as_object);
    for (name, their_schema) in theirs {
        let Some(my_schema) = mine.and_then(|m| m.get(name)) else {
            return Ok(false);
        };
        if !is_compatible(my_schema, their_schema)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// A custom schema prepared for checking values.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    schema: JsonValue,
    patterns: HashMap<String, Regex>,
}

impl SchemaValidator {
    /// Fails if the schema carries a pattern that does not compile.
    pub fn new(schema: JsonValue) -> Result<Self, SchemaError> {
        let mut patterns = HashMap::new();
        collect_patterns(&schema, &mut patterns)?;
        Ok(Self { schema, patterns })
    }

    pub fn schema(&self) -> &JsonValue {
        &self.schema
    }

    /// Check `value`. The error describes the first violation found.
    pub fn validate(&self, value: &JsonValue) -> Result<(), String> {
        self.check(&self.schema, value, "$")
    }

    fn check(&self, schema: &JsonValue, value: &JsonValue, path: &str) -> Result<(), String> {
        let Some(schema) = schema.as_object() else {
            return match schema.as_bool() {
                Some(false) => Err(format!("{}: no value is allowed", path)),
                _ => Ok(()),
            };
        };

        if let Some(declared) = schema.get("type") {
            let allowed: Vec<&str> = match declared {
                JsonValue::String(name) => vec![name.as_str()],
                JsonValue::Array(names) => names.iter().filter_map(JsonValue::as_str).collect(),
                _ => Vec::new(),
            };
            let actual = JsonType::of(value);
            let matches = allowed
                .iter()
                .any(|name| JsonType::parse(name).is_some_and(|ty| actual.fits(ty)));
            if !matches {
                return Err(format!(
                    "{}: expected {}, got {}",
                    path,
                    allowed.join(" or "),
                    actual.name()
                ));
            }
        }
        if let Some(choices) = schema.get("enum").and_then(JsonValue::as_array) {
            if !choices.contains(value) {
                return Err(format!("{}: {} is not one of the allowed values", path, value));
            }
        }

        match value {
            JsonValue::Number(n) => match n.as_f64() {
                Some(n) => check_number(schema, n, path),
                None => Ok(()),
            },
            JsonValue::String(s) => self.check_string(schema, s, path),
            JsonValue::Array(items) => self.check_array(schema, items, path),
            JsonValue::Object(map) => self.check_object(schema, map, path),
            JsonValue::Null | JsonValue::Bool(_) => Ok(()),
        }
    }

    fn check_string(&self, schema: &Map<String, JsonValue>, s: &str, path: &str) -> Result<(), String> {
        let len = s.chars().count() as u64;
        if let Some(min) = schema.get("minLength").and_then(JsonValue::as_u64) {
            if len < min {
                return Err(format!("{}: shorter than {} characters", path, min));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(JsonValue::as_u64) {
            if len > max {
                return Err(format!("{}: longer than {} characters", path, max));
            }
        }
        if let Some(pattern) = schema.get("pattern").and_then(JsonValue::as_str) {
            let matched = self.patterns.get(pattern).is_some_and(|re| re.is_match(s));
            if !matched {
                return Err(format!("{}: '{}' does not match '{}'", path, s, pattern));
            }
        }
        Ok(())
    }

    fn check_array(
        &self,
        schema: &Map<String, JsonValue>,
        items: &[JsonValue],
        path: &str,
    ) -> Result<(), String> {
        let len = items.len() as u64;
        if let Some(min) = schema.get("minItems").and_then(JsonValue::as_u64) {
            if len < min {
                return Err(format!("{}: fewer than {} items", path, min));
            }
        }
        if let Some(max) = schema.get("maxItems").and_then(JsonValue::as_u64) {
            if len > max {
                return Err(format!("{}: more than {} items", path, max));
            }
        }
        if schema.get("uniqueItems").and_then(JsonValue::as_bool) == Some(true) {
            for (i, item) in items.iter().enumerate() {
                if items[..i].contains(item) {
                    return Err(format!("{}: items are not unique", path));
                }
            }
        }
        match schema.get("items") {
            Some(JsonValue::Array(tuple)) => {
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    match tuple.get(i) {
                        Some(item_schema) => self.check(item_schema, item, &item_path)?,
                        None => match schema.get("additionalItems") {
                            Some(JsonValue::Bool(false)) => {
                                return Err(format!("{}: more than {} items", path, tuple.len()));
                            }
                            Some(extra) if extra.is_object() => {
                                self.check(extra, item, &item_path)?;
                            }
                            _ => {}
                        },
                    }
                }
            }
            Some(item_schema) => {
                for (i, item) in items.iter().enumerate() {
                    self.check(item_schema, item, &format!("{}[{}]", path, i))?;
                }
            }
            None => {}
        }
        Ok(())
    }

    fn check_object(
        &self,
        schema: &Map<String, JsonValue>,
        map: &Map<String, JsonValue>,
        path: &str,
    ) -> Result<(), String> {
        for name in required(schema) {
            if !map.contains_key(name) {
                return Err(format!("{}: missing property '{}'", path, name));
            }
        }
        let properties = schema.get("properties").and_then(JsonValue::as_object);
        for (name, value) in map {
            let property_path = format!("{}.{}", path, name);
            match properties.and_then(|p| p.get(name)) {
                Some(property) => self.check(property, value, &property_path)?,
                None => match schema.get("additionalProperties") {
                    Some(JsonValue::Bool(false)) => {
                        return Err(format!("{}: unexpected property '{}'", path, name));
                    }
                    Some(extra) if extra.is_object() => {
                        self.check(extra, value, &property_path)?;
                    }
                    _ => {}
                },
            }
        }
        Ok(())
    }
}

fn check_number(schema: &Map<String, JsonValue>, n: f64, path: &str) -> Result<(), String> {
    let flag = |key: &str| schema.get(key).and_then(JsonValue::as_bool).unwrap_or(false);
    if let Some(min) = schema.get("minimum").and_then(JsonValue::as_f64) {
        if n < min || (flag("exclusiveMinimum") && n <= min) {
            return Err(format!("{}: {} is below the minimum {}", path, n, min));
        }
    }
    if let Some(min) = schema.get("exclusiveMinimum").and_then(JsonValue::as_f64) {
        if n <= min {
            return Err(format!("{}: {} is not above {}", path, n, min));
        }
    }
    if let Some(max) = schema.get("maximum").and_then(JsonValue::as_f64) {
        if n > max || (flag("exclusiveMaximum") && n >= max) {
            return Err(format!("{}: {} is above the maximum {}", path, n, max));
        }
    }
    if let Some(max) = schema.get("exclusiveMaximum").and_then(JsonValue::as_f64) {
        if n >= max {
            return Err(format!("{}: {} is not below {}", path, n, max));
        }
    }
    if let Some(step) = schema.get("multipleOf").and_then(JsonValue::as_f64) {
        if step > 0.0 && !is_multiple(n, step) {
            return Err(format!("{}: {} is not a multiple of {}", path, n, step));
        }
    }
    Ok(())
}

fn collect_patterns(
    schema: &JsonValue,
    patterns: &mut HashMap<String, Regex>,
) -> Result<(), SchemaError> {
    match schema {
        JsonValue::Object(map) => {
            for (key, value) in map {
                match (key.as_str(), value) {
                    ("pattern", JsonValue::String(pattern)) => {
                        if !patterns.contains_key(pattern) {
                            let re = Regex::new(pattern).map_err(|e| {
                                SchemaError::Invalid(format!(
                                    "Cannot compile pattern '{}': {}",
                                    pattern, e
                                ))
                            })?;
                            patterns.insert(pattern.clone(), re);
                        }
                    }
                    ("enum" | "default" | "const", _) => {}
                    _ => collect_patterns(value, patterns)?,
                }
            }
            Ok(())
        }
        JsonValue::Array(items) => items
            .iter()
            .try_for_each(|item| collect_patterns(item, patterns)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn int4() -> JsonValue {
        json!({"type": "integer", "minimum": -2147483648i64, "maximum": 2147483647})
    }

    #[test]
    fn subrange_fits_native_range() {
        let percent = json!({"type": "integer", "minimum": 0, "maximum": 100});
        assert_eq!(is_compatible(&percent, &int4()), Ok(true));
        // the other way round allows values the custom type rejects
        assert_eq!(is_compatible(&int4(), &percent), Ok(false));
        // an unbounded custom integer does not fit a bounded native one
        assert_eq!(is_compatible(&json!({"type": "integer"}), &int4()), Ok(false));
    }

    #[test]
    fn integer_fits_number_only_one_way() {
        let int = json!({"type": "integer"});
        let number = json!({"type": "number"});
        assert_eq!(is_compatible(&int, &number), Ok(true));
        assert_eq!(is_compatible(&number, &int), Ok(false));
    }

    #[test]
    fn exclusive_bounds() {
        let native = json!({"type": "number", "minimum": -1.1});
        let exclusive = json!({"type": "number", "minimum": -1.1, "exclusiveMinimum": true});
        assert_eq!(is_compatible(&exclusive, &native), Ok(true));
        assert_eq!(is_compatible(&native, &exclusive), Ok(false));
        let inside = json!({"type": "number", "minimum": -0.9});
        assert_eq!(is_compatible(&inside, &exclusive), Ok(true));
    }

    #[test]
    fn multiple_of_must_divide() {
        let native = json!({"type": "number", "multipleOf": 3.9});
        assert_eq!(
            is_compatible(&json!({"type": "number", "multipleOf": 7.8}), &native),
            Ok(true)
        );
        assert_eq!(
            is_compatible(&json!({"type": "number", "multipleOf": 3.8}), &native),
            Ok(false)
        );
        assert_eq!(is_compatible(&json!({"type": "number"}), &native), Ok(false));
    }

    #[test]
    fn string_lengths_and_patterns() {
        let native = json!({"type": "string", "maxLength": 15, "pattern": "^\\d+$"});
        let shorter = json!({"type": "string", "maxLength": 10, "pattern": "^\\d+$"});
        assert_eq!(is_compatible(&shorter, &native), Ok(true));
        let longer = json!({"type": "string", "maxLength": 20, "pattern": "^\\d+$"});
        assert_eq!(is_compatible(&longer, &native), Ok(false));
        let other_pattern = json!({"type": "string", "maxLength": 10, "pattern": "^\\w+$"});
        assert_eq!(is_compatible(&other_pattern, &native), Ok(false));
    }

    #[test]
    fn array_items() {
        let numbers = json!({"type": "array", "items": {"type": "number"}});
        let ints = json!({"type": "array", "items": {"type": "integer"}, "maxItems": 3});
        assert_eq!(is_compatible(&ints, &numbers), Ok(true));
        assert_eq!(is_compatible(&numbers, &ints), Ok(false));

        let int3 = json!({
            "type": "array",
            "items": [{"type": "integer"}, {"type": "integer"}, {"type": "integer"}],
            "additionalItems": false
        });
        assert_eq!(is_compatible(&int3, &numbers), Ok(true));
        let int_string = json!({
            "type": "array",
            "items": [{"type": "integer"}, {"type": "integer"}, {"type": "integer"}],
            "additionalItems": {"type": "string"}
        });
        assert_eq!(is_compatible(&int_string, &numbers), Ok(false));
    }

    #[test]
    fn malformed_schemas() {
        assert!(matches!(
            is_compatible(&json!({"minimum": 1}), &int4()),
            Err(SchemaError::Invalid(_))
        ));
        assert!(matches!(
            is_compatible(&json!({"type": "integer"}), &json!({"minimum": 1})),
            Err(SchemaError::InvalidNative(_))
        ));
        assert!(matches!(
            SchemaValidator::new(json!({"type": "string", "pattern": "("})),
            Err(SchemaError::Invalid(_))
        ));
    }

    #[test]
    fn validates_values() {
        let percent =
            SchemaValidator::new(json!({"type": "integer", "minimum": 0, "maximum": 100})).unwrap();
        assert!(percent.validate(&json!(42)).is_ok());
        assert_eq!(
            percent.validate(&json!(150)).unwrap_err(),
            "$: 150 is above the maximum 100"
        );
        assert!(percent.validate(&json!(1.5)).is_err());
        assert!(percent.validate(&json!("42")).is_err());

        let point = SchemaValidator::new(json!({
            "type": "object",
            "required": ["x", "y"],
            "properties": {"x": {"type": "number"}, "y": {"type": "number"}},
            "additionalProperties": false
        }))
        .unwrap();
        assert!(point.validate(&json!({"x": 1, "y": 2.5})).is_ok());
        assert_eq!(
            point.validate(&json!({"x": 1})).unwrap_err(),
            "$: missing property 'y'"
        );
        assert!(point.validate(&json!({"x": 1, "y": 2, "z": 3})).is_err());

        let code = SchemaValidator::new(json!({
            "type": "array",
            "items": {"type": "string", "pattern": "^[A-Z]{2}$"},
            "maxItems": 2
        }))
        .unwrap();
        assert!(code.validate(&json!(["DE", "AT"])).is_ok());
        assert_eq!(
            code.validate(&json!(["DE", "x"])).unwrap_err(),
            "$[1]: 'x' does not match '^[A-Z]{2}$'"
        );
    }
}
