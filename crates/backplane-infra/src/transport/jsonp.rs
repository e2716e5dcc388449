//! JSONP response decoding.
//!
//! The server answers `callback=<name>` requests with `<name>(<json>);`.
//! Bodies that are already bare JSON are accepted as-is.

use backplane_types::error::TransportError;
use backplane_types::message::ChannelMessage;

/// Strip a `name(...)` wrapper, if present.
pub fn unwrap_jsonp(body: &str) -> Result<&str, TransportError> {
    let trimmed = body.trim().trim_end_matches(';').trim_end();
    if trimmed.is_empty() {
        return Err(TransportError::Decode("empty response body".to_string()));
    }

    let Some(open) = trimmed.find('(') else {
        return Ok(trimmed);
    };
    let callback = &trimmed[..open];
    let is_callback = !callback.is_empty()
        && callback
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'));
    if !is_callback {
        return Ok(trimmed);
    }

    trimmed[open + 1..]
        .strip_suffix(')')
        .map(str::trim)
        .ok_or_else(|| TransportError::Decode(format!("unterminated callback `{callback}`")))
}

/// Decode a retrieval response into a batch.
pub fn decode_batch(body: &str) -> Result<Vec<ChannelMessage>, TransportError> {
    let payload = unwrap_jsonp(body)?;
    serde_json::from_str(payload)
        .map_err(|e| TransportError::Decode(format!("invalid message batch: {e}")))
}

/// Decode a channel assignment response. The name may be a JSON string or
/// a bare token.
pub fn decode_channel_name(body: &str) -> Result<String, TransportError> {
    let payload = unwrap_jsonp(body)?;
    let name = if payload.starts_with('"') {
        serde_json::from_str::<String>(payload)
            .map_err(|e| TransportError::Decode(format!("invalid channel name: {e}")))?
    } else if payload.starts_with(['{', '[']) || payload.chars().any(char::is_whitespace) {
        return Err(TransportError::Decode(format!(
            "channel name is not a string: {payload}"
        )));
    } else {
        payload.to_string()
    };

    if name.trim().is_empty() {
        return Err(TransportError::Decode("empty channel name".to_string()));
    }
    Ok(name)
}
