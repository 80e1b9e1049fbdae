use axum::http::Method;
use serde_json::Value;

use crate::error::RequestError;
use crate::types::VerificationRequest;

/// Check an inbound request and build a [`VerificationRequest`] from it.
///
/// Only `POST` is accepted. `proof` and `publicInputs` must both be present
/// and truthy; their shape is left to the engine. An unparseable body counts
/// as missing both fields.
pub fn validate(method: &Method, body: &[u8]) -> Result<VerificationRequest, RequestError> {
    if method != Method::POST {
        return Err(RequestError::MethodNotAllowed);
    }

    let mut body: Value = serde_json::from_slice(body).map_err(|_| RequestError::BadRequest)?;

    match (
        required_field(&mut body, "proof"),
        required_field(&mut body, "publicInputs"),
    ) {
        (Some(proof), Some(public_inputs)) => Ok(VerificationRequest {
            proof,
            public_inputs,
        }),
        _ => Err(RequestError::BadRequest),
    }
}

fn required_field(body: &mut Value, name: &str) -> Option<Value> {
    body.get_mut(name)
        .map(Value::take)
        .filter(is_truthy)
}

/// `null`, `false`, zero and `""` are falsy; every other value, including
/// empty arrays and objects, is truthy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
