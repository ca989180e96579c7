use crate::UrlError;
use url::Url;

/// Query parameters that never change the resource a URI refers to
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
    "jsessionid",
    "phpsessid",
    "sid",
];

/// Normalizes a URI string into the form the engine schedules
///
/// # Normalization Steps
///
/// 1. Parse the URI; reject if malformed
/// 2. Only `http` and `https` are accepted
/// 3. Require a host (lowercased by the parser)
/// 4. Remove dot segments and collapse repeated slashes in the path
/// 5. Remove the fragment
///
/// The scheme, query and trailing slash are preserved: the result is still
/// the exact resource to fetch. Use [`canonicalize`] to compare URIs for
/// already-seen filtering.
///
/// # Arguments
///
/// * `uri_str` - The URI string to normalize
///
/// # Returns
///
/// * `Ok(Url)` - Normalized URI
/// * `Err(UrlError)` - Failed to parse or normalize the URI
///
/// # Examples
///
/// ```
/// use sumi_engine::uri::normalize_uri;
///
/// let url = normalize_uri("http://EXAMPLE.com/a/../b#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/b");
/// ```
pub fn normalize_uri(uri_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(uri_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlError::MissingHost),
    }

    let normalized_path = collapse_path(url.path(), true);
    url.set_path(&normalized_path);
    url.set_fragment(None);

    Ok(url)
}

/// Computes the canonical form of a URI used for already-seen filtering
///
/// Two URIs with the same canonical form are treated as the same resource:
/// the scheme is ignored, a leading `www.` is dropped, session and tracking
/// parameters are removed, the remaining query is sorted and a trailing
/// slash is dropped.
pub fn canonicalize(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host);

    let mut canonical = String::with_capacity(url.as_str().len());
    canonical.push_str(host);
    if let Some(port) = url.port() {
        canonical.push(':');
        canonical.push_str(&port.to_string());
    }
    canonical.push_str(&collapse_path(url.path(), false));

    let params = filter_and_sort_query_params(url);
    if !params.is_empty() {
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        canonical.push('?');
        canonical.push_str(&query);
    }

    canonical
}

/// Removes empty and dot segments from a path
///
/// When `keep_trailing` is false a trailing slash is dropped (except for the
/// root path).
fn collapse_path(path: &str, keep_trailing: bool) -> String {
    let trailing = path.len() > 1 && path.ends_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut result = format!("/{}", segments.join("/"));
    if keep_trailing && trailing {
        result.push('/');
    }
    result
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&key.as_str()) || key.starts_with("utm_")
}
