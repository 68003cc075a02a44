//! Joining provider base URLs with endpoint paths

/// Strip trailing slashes so endpoints can be appended with a single `/`.
///
/// ```
/// use tutorchat::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://ark.cn-beijing.volces.com/api/v3/"), "https://ark.cn-beijing.volces.com/api/v3");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// ```
/// use tutorchat::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://open.bigmodel.cn/api/paas/v4/", "/chat/completions"),
///     "https://open.bigmodel.cn/api/paas/v4/chat/completions"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{normalized_base}/{endpoint}")
}
