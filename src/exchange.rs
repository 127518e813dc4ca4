//! Single form-encoded request/response exchange.
//!
//! One HTTP POST per call, no retries; retry policy belongs to the poll loop.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{header, StatusCode};
use url::{form_urlencoded, Url};

use crate::error::{ExchangeError, OAuthError};

pub(crate) const FORM_MEDIA_TYPE: &str = "application/x-www-form-urlencoded";

/// Parsed form body. Duplicate keys are not used by this protocol; the last
/// value wins.
pub(crate) type FormValues = HashMap<String, String>;

/// POST `params` form-encoded to `url` and classify the response.
///
/// A non-200 status or a non-empty `error` field is always a failure, never
/// success; a body that cannot be decoded as a form takes precedence over
/// protocol-error decoding and degrades the failure to a bare status error.
pub(crate) async fn post_form(
    client: &reqwest::Client,
    user_agent: &str,
    url: Url,
    params: &[(&str, &str)],
) -> Result<FormValues, ExchangeError> {
    let mut request = client
        .post(url.clone())
        .header(header::ACCEPT, FORM_MEDIA_TYPE)
        .form(params);
    if !user_agent.is_empty() {
        request = request.header(header::USER_AGENT, user_agent);
    }

    let response = request
        .send()
        .await
        .map_err(|source| ExchangeError::Transport {
            url: url.clone(),
            source,
        })?;

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let body = response
        .bytes()
        .await
        .map_err(|err| format!("read response: {err}"));

    let parsed = decode_form_body(content_type.as_deref(), body.as_deref().map_err(String::clone));

    let has_protocol_error = parsed
        .as_ref()
        .map(|values| values.get("error").is_some_and(|code| !code.is_empty()))
        .unwrap_or(false);
    if status != StatusCode::OK || has_protocol_error {
        return match parsed.ok().as_ref().and_then(protocol_error) {
            Some(source) => Err(ExchangeError::OAuth { url, source }),
            None => Err(ExchangeError::Status { url, status }),
        };
    }

    parsed.map_err(|detail| ExchangeError::Format { url, detail })
}

fn decode_form_body(
    content_type: Option<&str>,
    body: Result<&[u8], String>,
) -> Result<FormValues, String> {
    let media_type = match content_type {
        None => return Err("missing Content-Type".to_string()),
        Some(raw) => raw
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase(),
    };
    if media_type != FORM_MEDIA_TYPE {
        return Err(format!("Content-Type is {media_type:?} instead of form"));
    }
    let body = body?;
    if std::str::from_utf8(body).is_err() {
        return Err("read response: body is not valid UTF-8".to_string());
    }
    Ok(form_urlencoded::parse(body).into_owned().collect())
}

/// Decode a structured OAuth error from a parsed body, if the `error` field
/// is present and non-empty.
fn protocol_error(values: &FormValues) -> Option<OAuthError> {
    let code = values.get("error").filter(|code| !code.is_empty())?;
    Some(OAuthError {
        code: code.clone(),
        description: values
            .get("error_description")
            .cloned()
            .unwrap_or_default(),
        interval: parse_seconds(values.get("interval").map(String::as_str)),
    })
}

/// Parse a wire field as a positive number of seconds.
///
/// Absent, non-numeric, and zero values all yield `None`; the caller
/// substitutes its component default. Malformed server values must never
/// abort the flow.
pub(crate) fn parse_seconds(value: Option<&str>) -> Option<Duration> {
    match value?.parse::<u32>() {
        Ok(seconds) if seconds > 0 => Some(Duration::from_secs(seconds.into())),
        _ => None,
    }
}
