use axum::http::{HeaderMap, header::AUTHORIZATION};

const API_KEY_HEADER: &str = "x-api-key";

/// Pulls the caller's credential out of the request headers.
///
/// `Authorization` is tried first and accepts `Bearer <t>`, `token <t>` or a
/// bare token. `x-api-key` is the fallback. Blank values count as absent.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(token_from_authorization)
        .or_else(|| {
            headers
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        })
}

fn token_from_authorization(value: &str) -> Option<String> {
    let value = value.trim();
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if is_scheme(scheme) => rest.trim(),
        None if is_scheme(value) => "",
        _ => value,
    };
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn is_scheme(word: &str) -> bool {
    word.eq_ignore_ascii_case("bearer") || word.eq_ignore_ascii_case("token")
}
