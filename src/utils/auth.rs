//! Authentication headers for provider requests

/// Both supported providers authenticate with `Authorization: Bearer <key>`.
pub fn add_auth_headers(request: reqwest::RequestBuilder, api_key: &str) -> reqwest::RequestBuilder {
    request.header("Authorization", format!("Bearer {api_key}"))
}
