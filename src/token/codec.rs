//! Base64url and JSON encoding of compact JWS segments.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Accepts segments with or without trailing `=` padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("segment is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode(segment: &str) -> Result<Vec<u8>, CodecError> {
    Ok(URL_SAFE_LENIENT.decode(segment)?)
}

/// `base64url(JSON(value))`.
pub fn encode_segment<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    Ok(encode(&serde_json::to_vec(value)?))
}

/// Decodes a single segment into a JSON-deserializable value.
pub fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, CodecError> {
    let text = String::from_utf8(decode(segment)?)?;
    Ok(serde_json::from_str(&text)?)
}

/// The unsigned JWS input: `base64url(header) + "." + base64url(payload)`.
pub fn signing_input<H, P>(header: &H, payload: &P) -> Result<String, CodecError>
where
    H: Serialize + ?Sized,
    P: Serialize + ?Sized,
{
    Ok(format!("{}.{}", encode_segment(header)?, encode_segment(payload)?))
}

/// Appends the encoded signature to a signing input.
pub fn assemble(signing_input: &str, signature: &[u8]) -> String {
    format!("{}.{}", signing_input, encode(signature))
}
