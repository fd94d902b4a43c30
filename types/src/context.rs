//! Recovery of a NEAR signature bundle from Self.xyz user context data.
//!
//! Self.xyz echoes back whatever "user defined data" was attached to the proof
//! request. The wallet signature is carried through that channel as a small JSON
//! object, but by the time it comes back it may be hex encoded, padded with NUL
//! bytes to a fixed width, surrounded by framing bytes, or delivered as an array
//! of byte values. Everything here treats the input as hostile: failures are
//! reported as a [`ContextParseError`] and nothing panics.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{AccountId, errors::ContextParseError, nep413::Nonce};

const REQUIRED_FIELDS: [&str; 4] = ["accountId", "signature", "publicKey", "nonce"];

/// The wallet signature carried inside user context data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearSignatureBundle {
    pub account_id: AccountId,
    /// Base64 encoded ed25519 signature.
    pub signature: String,
    /// `ed25519:<base58>`.
    pub public_key: String,
    pub nonce: Nonce,
    /// Milliseconds since epoch at which the wallet signed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

/// Parses user context data delivered as a string: hex (optionally `0x` prefixed)
/// or raw text.
pub fn parse_user_context_data(input: &str) -> Result<NearSignatureBundle, ContextParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ContextParseError::Empty);
    }

    let hex_body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if is_hex_encoded(hex_body) {
        let bytes = hex::decode(hex_body)
            .map_err(|err| ContextParseError::InvalidJson(err.to_string()))?;
        return parse_user_context_bytes(&bytes);
    }

    parse_user_context_bytes(trimmed.as_bytes())
}

/// Parses user context data that has already been turned into bytes.
pub fn parse_user_context_bytes(bytes: &[u8]) -> Result<NearSignatureBundle, ContextParseError> {
    let stripped: Vec<u8> = bytes.iter().copied().filter(|byte| *byte != 0).collect();
    if stripped.is_empty() {
        return Err(ContextParseError::Empty);
    }

    // The object spans the first `{` to the last `}`. Framing bytes may not contain braces.
    let start = stripped.iter().position(|byte| *byte == b'{');
    let end = stripped.iter().rposition(|byte| *byte == b'}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => {
            bundle_from_fields(parse_object(&stripped[start..=end])?)
        }
        _ => Err(ContextParseError::NoJsonObject),
    }
}

/// Parses user context data that arrived inside a JSON document.
///
/// Accepts a string, an array of byte values, an object keyed by decimal byte
/// indices (how some serializers emit a `Uint8Array`), or the bundle object itself.
pub fn parse_user_context_value(value: &Value) -> Result<NearSignatureBundle, ContextParseError> {
    match value {
        Value::String(text) => parse_user_context_data(text),
        Value::Array(items) => {
            let bytes = items
                .iter()
                .enumerate()
                .map(|(index, item)| byte_at(index, item))
                .collect::<Result<Vec<u8>, _>>()?;
            parse_user_context_bytes(&bytes)
        }
        Value::Object(fields) if fields.contains_key("accountId") => {
            bundle_from_fields(fields.clone())
        }
        Value::Object(fields) => {
            let mut indexed = fields
                .iter()
                .map(|(key, item)| -> Result<(usize, u8), ContextParseError> {
                    let index = key
                        .parse::<usize>()
                        .map_err(|_| ContextParseError::UnsupportedShape("object with non-index keys"))?;
                    Ok((index, byte_at(index, item)?))
                })
                .collect::<Result<Vec<(usize, u8)>, ContextParseError>>()?;
            indexed.sort_unstable_by_key(|(index, _)| *index);
            let bytes: Vec<u8> = indexed.into_iter().map(|(_, byte)| byte).collect();
            parse_user_context_bytes(&bytes)
        }
        Value::Null => Err(ContextParseError::Empty),
        Value::Bool(_) | Value::Number(_) => Err(ContextParseError::UnsupportedShape("scalar")),
    }
}

fn is_hex_encoded(value: &str) -> bool {
    !value.is_empty() && value.len() % 2 == 0 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

fn byte_at(index: usize, item: &Value) -> Result<u8, ContextParseError> {
    item.as_u64()
        .and_then(|value| u8::try_from(value).ok())
        .ok_or(ContextParseError::ByteOutOfRange(index))
}

fn parse_object(candidate: &[u8]) -> Result<Map<String, Value>, ContextParseError> {
    let text = std::str::from_utf8(candidate).map_err(|_| ContextParseError::InvalidUtf8)?;
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(ContextParseError::InvalidJson("expected a JSON object".to_string())),
        Err(err) => Err(ContextParseError::InvalidJson(err.to_string())),
    }
}

fn bundle_from_fields(
    mut fields: Map<String, Value>,
) -> Result<NearSignatureBundle, ContextParseError> {
    if let Some(missing) = REQUIRED_FIELDS
        .into_iter()
        .find(|field| fields.get(*field).is_none_or(Value::is_null))
    {
        return Err(ContextParseError::MissingField(missing));
    }

    let account_id = required_string(&fields, "accountId")?
        .parse::<AccountId>()
        .map_err(|err| invalid("accountId", err))?;
    let signature = required_string(&fields, "signature")?.to_string();
    let public_key = required_string(&fields, "publicKey")?.to_string();
    let nonce = fields
        .remove("nonce")
        .map(serde_json::from_value::<Nonce>)
        .transpose()
        .map_err(|err| invalid("nonce", err))?
        .ok_or(ContextParseError::MissingField("nonce"))?;

    Ok(NearSignatureBundle {
        account_id,
        signature,
        public_key,
        nonce,
        timestamp: optional_timestamp(&fields)?,
        challenge: optional_string(&fields, "challenge")?,
        recipient: optional_string(&fields, "recipient")?,
    })
}

fn invalid(field: &'static str, err: impl ToString) -> ContextParseError {
    ContextParseError::InvalidField {
        field,
        reason: err.to_string(),
    }
}

fn required_string<'a>(
    fields: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, ContextParseError> {
    match fields.get(field) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.trim()),
        Some(Value::String(_)) => Err(ContextParseError::MissingField(field)),
        Some(_) => Err(invalid(field, "expected a string")),
        None => Err(ContextParseError::MissingField(field)),
    }
}

fn optional_string(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, ContextParseError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(invalid(field, "expected a string")),
    }
}

/// Accepts a non-negative integer or a string of digits.
fn optional_timestamp(fields: &Map<String, Value>) -> Result<Option<u64>, ContextParseError> {
    match fields.get("timestamp") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid("timestamp", "expected a non-negative integer")),
        Some(Value::String(text)) => text
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|err| invalid("timestamp", err)),
        Some(_) => Err(invalid("timestamp", "expected a number")),
    }
}
