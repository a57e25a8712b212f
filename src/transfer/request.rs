use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use reqwest::{Client, Proxy, RequestBuilder};

use crate::types::types::{AuthenticationInfo, TransferError};

use super::engine::EngineConfig;

/// Builds the per-session HTTP client: proxy (with optional proxy
/// credentials) plus the connection tuning every session gets.
pub(crate) fn build_client(config: &EngineConfig) -> Result<Client, TransferError> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .tcp_nodelay(true);

    if let Some(info) = &config.proxy {
        let mut proxy = Proxy::all(format!("http://{}:{}", info.host, info.port))?;
        if let (Some(user), Some(pass)) = (&info.username, &info.password) {
            proxy = proxy.basic_auth(user, pass);
        }
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Assembles one outbound request: typed scalar fields first, then the
/// reusable header map on top (a present, non-empty entry wins), with
/// `Range` and `If-Modified-Since` reconciled separately.
pub(crate) fn build_request(
    client: &Client,
    url: &str,
    config: &EngineConfig,
    resume_offset: u64,
    auth_header: Option<&str>,
) -> RequestBuilder {
    let user_agent = header_value(&config.headers, "user-agent").unwrap_or(&config.user_agent);
    let mut builder = client.get(url).header("User-Agent", user_agent);

    if let Some(stamp) = resolve_if_modified_since(config) {
        builder = builder.header("If-Modified-Since", stamp);
    }

    for (key, values) in &config.headers {
        // These three go through their typed reconciliation above.
        if key.eq_ignore_ascii_case("range")
            || key.eq_ignore_ascii_case("if-modified-since")
            || key.eq_ignore_ascii_case("user-agent")
        {
            continue;
        }
        for value in values {
            if !value.is_empty() {
                builder = builder.header(key.as_str(), value.as_str());
            }
        }
    }

    if let Some(cookies) = &config.cookies {
        builder = builder.header("Cookie", cookies.as_str());
    }
    if let Some(auth_value) = auth_header {
        builder = builder.header("Authorization", auth_value);
    }
    if resume_offset > 0 {
        builder = builder.header("Range", format!("bytes={}-", resume_offset));
    }

    builder
}

/// Reconciles a numeric `Range` entry in the header map with the configured
/// resume offset. The header wins when it parses to a positive offset.
pub fn resolve_resume_offset(config: &EngineConfig) -> u64 {
    if let Some(raw) = header_value(&config.headers, "range") {
        if let Some(parsed) = parse_range_offset(raw) {
            if parsed > 0 {
                return parsed;
            }
        }
    }
    config.resume_offset
}

/// A conditional-fetch timestamp set via the header map takes precedence
/// over the typed property.
pub(crate) fn resolve_if_modified_since(config: &EngineConfig) -> Option<String> {
    header_value(&config.headers, "if-modified-since")
        .map(str::to_string)
        .or_else(|| config.if_modified_since.clone())
}

/// Accepts a bare byte count or the `bytes=N-` form.
fn parse_range_offset(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if let Ok(offset) = trimmed.parse::<u64>() {
        return Some(offset);
    }
    let rest = trimmed.strip_prefix("bytes=")?;
    rest.split('-').next()?.trim().parse().ok()
}

fn header_value<'a>(headers: &'a HashMap<String, Vec<String>>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.iter().find(|value| !value.is_empty()))
        .map(String::as_str)
}

/// Pre-computes the Basic auth header value, if credentials are configured.
pub(crate) fn precompute_auth(auth: Option<&AuthenticationInfo>) -> Option<String> {
    auth.map(|info| {
        let credentials = format!("{}:{}", info.username, info.password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&credentials);
        format!("Basic {}", encoded)
    })
}

/// Extract a plain `filename=` value (with or without quotes) from a
/// `Content-Disposition` header.
pub fn extract_filename(disposition: &str) -> Option<String> {
    let lower = disposition.to_lowercase();
    let key = "filename=";
    let idx = lower.find(key)?;
    let slice = &disposition[idx + key.len()..];
    let end = slice.find(';').unwrap_or(slice.len());
    let raw = slice[..end].trim().trim_matches('"');
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_header(key: &str, value: &str) -> EngineConfig {
        let mut config = EngineConfig::default();
        config
            .headers
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        config
    }

    #[test]
    fn range_header_wins_over_configured_offset() {
        let mut config = config_with_header("Range", "4096");
        config.resume_offset = 100;
        assert_eq!(resolve_resume_offset(&config), 4096);
    }

    #[test]
    fn bytes_form_range_header_parses() {
        let config = config_with_header("range", "bytes=2048-");
        assert_eq!(resolve_resume_offset(&config), 2048);
    }

    #[test]
    fn unparseable_range_header_falls_back_to_offset() {
        let mut config = config_with_header("Range", "whenever");
        config.resume_offset = 512;
        assert_eq!(resolve_resume_offset(&config), 512);
    }

    #[test]
    fn zero_range_header_falls_back_to_offset() {
        let mut config = config_with_header("Range", "0");
        config.resume_offset = 9;
        assert_eq!(resolve_resume_offset(&config), 9);
    }

    #[test]
    fn if_modified_since_header_beats_typed_field() {
        let mut config = config_with_header("If-Modified-Since", "Sun, 01 Jan 2026 00:00:00 GMT");
        config.if_modified_since = Some("Mon, 02 Feb 2026 00:00:00 GMT".to_string());
        assert_eq!(
            resolve_if_modified_since(&config).as_deref(),
            Some("Sun, 01 Jan 2026 00:00:00 GMT")
        );
    }

    #[test]
    fn empty_header_entry_does_not_override() {
        let mut config = config_with_header("If-Modified-Since", "");
        config.if_modified_since = Some("Mon, 02 Feb 2026 00:00:00 GMT".to_string());
        assert_eq!(
            resolve_if_modified_since(&config).as_deref(),
            Some("Mon, 02 Feb 2026 00:00:00 GMT")
        );
    }

    #[test]
    fn header_map_overrides_typed_user_agent() {
        let mut config = config_with_header("User-Agent", "custom/2.0");
        config.user_agent = "default/1.0".to_string();
        let client = Client::new();
        let request = build_request(&client, "http://localhost/x", &config, 0, None)
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get("User-Agent").unwrap(),
            &"custom/2.0"
        );
    }

    #[test]
    fn resume_offset_becomes_open_ended_range() {
        let config = EngineConfig::default();
        let client = Client::new();
        let request = build_request(&client, "http://localhost/x", &config, 1000, None)
            .build()
            .unwrap();
        assert_eq!(request.headers().get("Range").unwrap(), &"bytes=1000-");
    }

    #[test]
    fn precomputed_auth_is_basic_base64() {
        let auth = AuthenticationInfo {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        assert_eq!(
            precompute_auth(Some(&auth)).as_deref(),
            Some("Basic dXNlcjpwYXNz")
        );
    }

    #[test]
    fn filename_extraction_handles_quotes_and_params() {
        assert_eq!(
            extract_filename("attachment; filename=\"cover.png\"; size=1024"),
            Some("cover.png".to_string())
        );
        assert_eq!(
            extract_filename("attachment; filename=feed.xml"),
            Some("feed.xml".to_string())
        );
        assert_eq!(extract_filename("inline"), None);
    }
}
