//! Canonical JSON serialization for deterministic hashing.
//!
//! Scenario identity and configuration fingerprints are hashed over canonical
//! JSON so the bytes never depend on struct field order, map iteration order
//! or formatting:
//!
//! - object keys sorted lexicographically (UTF-8 byte order)
//! - no whitespace
//! - integers only; floats are rejected because their textual form is not
//!   stable across serializers
//!
//! # Python Equivalent
//!
//! ```python
//! json.dumps(value, sort_keys=True, separators=(",", ":"), ensure_ascii=False, allow_nan=False)
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur during canonical JSON serialization.
#[derive(Debug, Error)]
pub enum CanonicalJsonError {
    /// Serde JSON conversion failed.
    #[error("serde_json error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Float values are not allowed in canonical JSON.
    #[error("float value at '{path}' is not allowed in canonical JSON (use integers or strings)")]
    FloatNotAllowed {
        /// JSON pointer of the offending value.
        path: String,
    },
}

/// Serialize `value` into canonical JSON bytes.
///
/// # Errors
///
/// Returns `CanonicalJsonError::Serde` if serialization fails (this includes
/// non-finite floats), or `CanonicalJsonError::FloatNotAllowed` if the value
/// contains a float.
#[must_use = "canonical bytes should be used for hashing"]
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalJsonError> {
    let v = serde_json::to_value(value)?;
    reject_floats(&v, &mut String::new())?;
    let mut out = Vec::<u8>::new();
    write_value(&v, &mut out)?;
    Ok(out)
}

/// Same as [`to_canonical_bytes`], but returns a UTF-8 string.
///
/// # Errors
///
/// See [`to_canonical_bytes`].
#[must_use = "canonical string should be used for hashing"]
pub fn to_canonical_string<T: Serialize>(value: &T) -> Result<String, CanonicalJsonError> {
    let bytes = to_canonical_bytes(value)?;
    // Only serde_json output and ASCII punctuation are written.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn reject_floats(v: &Value, path: &mut String) -> Result<(), CanonicalJsonError> {
    match v {
        Value::Number(n) if n.is_f64() => Err(CanonicalJsonError::FloatNotAllowed {
            path: if path.is_empty() { "/".to_string() } else { path.clone() },
        }),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let len = path.len();
                path.push_str(&format!("/{i}"));
                reject_floats(item, path)?;
                path.truncate(len);
            }
            Ok(())
        }
        Value::Object(map) => {
            for (k, item) in map {
                let len = path.len();
                path.push('/');
                path.push_str(k);
                reject_floats(item, path)?;
                path.truncate(len);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn write_value(v: &Value, out: &mut Vec<u8>) -> Result<(), CanonicalJsonError> {
    match v {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => serde_json::to_writer(&mut *out, s)?,
        Value::Array(arr) => {
            out.push(b'[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => write_object(map, out)?,
    }
    Ok(())
}

fn write_object(map: &Map<String, Value>, out: &mut Vec<u8>) -> Result<(), CanonicalJsonError> {
    out.push(b'{');
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (i, (k, val)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        serde_json::to_writer(&mut *out, k)?;
        out.push(b':');
        write_value(val, out)?;
    }
    out.push(b'}');
    Ok(())
}
