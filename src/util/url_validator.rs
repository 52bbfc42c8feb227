use thiserror::Error;
use url::Url;

/// Errors that can occur while validating the backend base URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Plain HTTP to a remote host would expose the bearer token.
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    Insecure,
    /// The URL carries a query or fragment, which cannot be joined with API routes.
    #[error("Base URL must not contain a query string or fragment")]
    HasQuery,
}

/// Validates the backend base URL used by the HTTP feed client.
///
/// Accepts `https://` for any host and `http://` only for loopback hosts
/// (`localhost`, `127.0.0.1`, `::1`), which keeps mock servers usable in
/// tests without sending credentials over plaintext elsewhere.
///
/// The returned string has no trailing slash so routes can be appended
/// directly.
///
/// # Examples
///
/// ```
/// use feedline::util::validate_base_url;
///
/// assert_eq!(
///     validate_base_url("https://api.example.com/v1/").unwrap(),
///     "https://api.example.com/v1"
/// );
/// assert!(validate_base_url("http://api.example.com").is_err());
/// assert!(validate_base_url("http://127.0.0.1:8080").is_ok());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<String, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "https" => {}
        "http" => {
            if !is_loopback(&url) {
                return Err(UrlValidationError::Insecure);
            }
            tracing::warn!(base_url = %url, "Using non-HTTPS base URL (loopback only)");
        }
        other => return Err(UrlValidationError::UnsupportedScheme(other.to_string())),
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(UrlValidationError::HasQuery);
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(host)) => host.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
