//! Serde helpers for loosely typed backend fields.

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
}

/// Identifiers arrive as integers from the backend but are handled as
/// opaque strings everywhere else.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Int(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(deserialize_with = "string_or_number")]
        id: String,
    }

    #[test]
    fn test_string_or_number() {
        let numeric: Holder = serde_json::from_str(r#"{"id": 12}"#).expect("numeric id");
        assert_eq!(numeric.id, "12");

        let text: Holder = serde_json::from_str(r#"{"id": "ab-1"}"#).expect("string id");
        assert_eq!(text.id, "ab-1");
    }
}
