use std::collections::HashMap;
use std::time::Duration;

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// HTTP-date values are ignored because vendors use the numeric form.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Overlays the configured default headers on top of a provider's built-in headers.
///
/// Names compare case-insensitively and the configured value wins on collision.
pub(crate) fn merge_headers(
    mut builtin: HashMap<String, String>,
    defaults: &HashMap<String, String>,
) -> HashMap<String, String> {
    for (name, value) in defaults {
        builtin.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        builtin.insert(name.clone(), value.clone());
    }
    builtin
}
