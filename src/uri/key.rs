use url::Url;

/// Computes the politeness key for a URI
///
/// URIs sharing a key are fetched one at a time and spaced by the politeness
/// delay. The key is the lowercase host, followed by `:port` when the URI
/// names a non-default port.
///
/// # Arguments
///
/// * `url` - The URI to compute the key for
///
/// # Returns
///
/// * `Some(String)` - The politeness key
/// * `None` - If the URI has no host
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_engine::uri::politeness_key;
///
/// let url = Url::parse("https://Example.com:8443/path").unwrap();
/// assert_eq!(politeness_key(&url), Some("example.com:8443".to_string()));
/// ```
pub fn politeness_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}
