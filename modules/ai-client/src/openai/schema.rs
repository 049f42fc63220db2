use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Types usable as OpenAI structured output.
///
/// Blanket-implemented for anything `JsonSchema + DeserializeOwned`.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// JSON schema in the strict dialect OpenAI accepts:
    /// every object has `additionalProperties: false`, every property is
    /// listed in `required` (nullable ones included), no `$ref`s.
    fn openai_schema() -> Value {
        let mut value = serde_json::to_value(schema_for!(Self)).unwrap_or_default();

        let definitions = match &mut value {
            Value::Object(map) => map.remove("definitions"),
            _ => None,
        };
        if let Some(defs) = definitions {
            inline_refs(&mut value, &defs);
        }
        make_strict(&mut value);

        if let Value::Object(map) = &mut value {
            map.remove("$schema");
        }
        value
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

fn make_strict(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("object") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
                let keys = property_keys(map);
                if let Some(keys) = keys {
                    map.insert("required".to_string(), Value::Array(keys));
                }
            }
            for v in map.values_mut() {
                make_strict(v);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(make_strict),
        _ => {}
    }
}

fn property_keys(map: &Map<String, Value>) -> Option<Vec<Value>> {
    map.get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().map(Value::String).collect())
}

/// Replace `{"$ref": "#/definitions/X"}` with the definition body, and
/// collapse single-element `allOf` wrappers schemars emits around refs.
fn inline_refs(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            let target = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .and_then(|name| definitions.get(name))
                .cloned();
            if let Some(def) = target {
                *value = def;
                inline_refs(value, definitions);
                return;
            }

            let single = match map.get("allOf").and_then(Value::as_array) {
                Some(all_of) if all_of.len() == 1 => Some(all_of[0].clone()),
                _ => None,
            };
            if let Some(inner) = single {
                *value = inner;
                inline_refs(value, definitions);
                return;
            }

            for v in map.values_mut() {
                inline_refs(v, definitions);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| inline_refs(v, definitions)),
        _ => {}
    }
}
