//! Content processors shipped with the CLI.

use docline_core::{ContentProcessor, LineageError, Metadata};

/// Reads a JSON object and uses its top-level fields as metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonContentProcessor;

impl ContentProcessor for JsonContentProcessor {
    fn process(&self, raw: &[u8]) -> Result<Metadata, LineageError> {
        let value: serde_json::Value = serde_json::from_slice(raw)
            .map_err(|e| LineageError::ValidationFailed(format!("metadata is not JSON: {}", e)))?;
        match value {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(LineageError::ValidationFailed(format!(
                "metadata must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_fields_become_metadata() {
        let metadata = JsonContentProcessor
            .process(br#"{"title": "Q1", "pages": 3}"#)
            .expect("object");
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["pages"], json!(3));
    }

    #[test]
    fn non_objects_are_rejected() {
        for raw in [&b"[1, 2]"[..], b"\"text\"", b"not json"] {
            assert!(matches!(
                JsonContentProcessor.process(raw),
                Err(LineageError::ValidationFailed(_))
            ));
        }
    }
}
