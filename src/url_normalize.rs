//! URL canonicalization for result deduplication.
//!
//! Canonical URLs compare equal when pages differ only in host case, default
//! ports, tracking parameters, query-parameter order, fragments, or trailing
//! slashes. One level of known redirect wrappers (search-engine click
//! trackers, outbound-link filters) is unwrapped first.

use std::net::IpAddr;

use url::Url;

/// Tracking query parameters that are stripped during normalization.
const TRACKING_PARAMS: &[&str] = &[
    "gclid",
    "fbclid",
    "msclkid",
    "igshid",
    "mc_cid",
    "mc_eid",
    "spm",
    "spm_id_from",
    "from",
    "from_source",
    "source",
    "sourcefrom",
    "shareuid",
    "scene",
    "platform",
    "ref",
    "refer",
    "ref_source",
    "referrer",
    "vd_source",
    "_t",
    "_r",
    "mpshare",
];

/// Prefixes that mark a whole family of tracking parameters.
const TRACKING_PREFIXES: &[&str] = &["utm_", "share_"];

/// Second-level labels under which registrations happen one level deeper
/// (`example.co.uk`, `example.com.cn`).
const MULTI_PART_SLDS: &[&str] = &["co", "com", "net", "org", "gov", "edu", "ac", "ne", "or"];

/// Normalize a URL for deduplication comparison.
///
/// 1. Prefix scheme-relative (`//host`) and bare `www.` inputs with `https:`.
/// 2. Unwrap one known redirect wrapper.
/// 3. Lowercase scheme and host, drop the default port and the fragment.
/// 4. Strip tracking parameters and sort the rest by key, then value.
/// 5. Trim trailing slashes from the path (the root stays `/`).
///
/// Unparseable input is returned trimmed but otherwise unchanged. The
/// function is idempotent.
///
/// # Examples
///
/// ```
/// use a3s_websearch::url_normalize::normalize_url;
///
/// let a = normalize_url("https://Example.COM:443/path/?b=2&utm_source=x&a=1#top");
/// let b = normalize_url("https://example.com/path?a=1&b=2");
/// assert_eq!(a, b);
/// ```
pub fn normalize_url(raw: &str) -> String {
    let coerced = coerce_scheme(raw.trim());
    let target = unwrap_redirect(&coerced).unwrap_or(coerced);
    match canonicalize(&target) {
        Some(url) => url.to_string(),
        None => target,
    }
}

/// Parses and canonicalizes a URL without unwrapping redirects.
pub fn canonicalize(raw: &str) -> Option<Url> {
    let mut parsed = Url::parse(raw).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    parsed.set_fragment(None);
    if is_default_port(&parsed) {
        let _ = parsed.set_port(None);
    }

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    if params.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(params);
    }

    let trimmed = parsed.path().trim_end_matches('/').to_string();
    if trimmed.is_empty() {
        parsed.set_path("/");
    } else if trimmed.len() != parsed.path().len() {
        parsed.set_path(&trimmed);
    }

    Some(parsed)
}

/// Returns the inner target of a known redirect wrapper.
///
/// Only one level is unwrapped. When the inner target is itself a wrapper the
/// outer URL is left alone, so that normalization stays idempotent.
pub fn unwrap_redirect(raw: &str) -> Option<String> {
    let inner = redirect_target(raw)?;
    if redirect_target(&inner).is_some() {
        return None;
    }
    Some(inner)
}

fn redirect_target(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    // Canonical form drops the trailing slash; match both forms.
    let path = parsed.path().trim_end_matches('/');

    let keys: &[&str] = if host_matches(&host, "duckduckgo.com") && (path == "/l" || path.starts_with("/l/")) {
        &["uddg"]
    } else if host == "link.zhihu.com" {
        &["target"]
    } else if host == "search.brave.com" && path.contains("redirect") {
        &["url", "q"]
    } else if is_google_host(&host) && path == "/url" {
        &["q", "url"]
    } else if host_matches(&host, "youtube.com") && path == "/redirect" {
        &["q"]
    } else if host_matches(&host, "steamcommunity.com") && path.starts_with("/linkfilter") {
        &["url", "u"]
    } else if matches!(host.as_str(), "l.facebook.com" | "lm.facebook.com") {
        &["u"]
    } else if host_matches(&host, "pinterest.com") && host.starts_with("redirect.") {
        &["url", "u", "target"]
    } else {
        return None;
    };

    for key in keys {
        let Some((_, value)) = parsed.query_pairs().find(|(k, _)| k == key) else {
            continue;
        };
        let candidate = coerce_scheme(value.trim());
        if let Ok(inner) = Url::parse(&candidate) {
            if matches!(inner.scheme(), "http" | "https") && inner.host_str().is_some() {
                return Some(candidate);
            }
        }
    }
    None
}

fn coerce_scheme(raw: &str) -> String {
    if let Some(rest) = raw.strip_prefix("//") {
        format!("https://{rest}")
    } else if raw.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("www.")) {
        format!("https://{raw}")
    } else {
        raw.to_string()
    }
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&key.as_str())
        || TRACKING_PREFIXES.iter().any(|p| key.starts_with(p))
}

fn is_default_port(url: &Url) -> bool {
    matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    )
}

fn is_google_host(host: &str) -> bool {
    let bare = host.strip_prefix("www.").unwrap_or(host);
    bare == "google.com" || bare.starts_with("google.")
}

/// Whether `host` equals `domain` or is a subdomain of it.
pub fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Lowercased host of a URL, if it parses.
pub fn host_of(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    parsed.host_str().map(|h| h.to_ascii_lowercase())
}

/// Approximates the registrable domain of a host (`news.bbc.co.uk` becomes
/// `bbc.co.uk`). IP literals are returned unchanged.
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return host;
    }

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }

    let tld = labels[labels.len() - 1];
    let sld = labels[labels.len() - 2];
    let keep = if tld.len() == 2 && MULTI_PART_SLDS.contains(&sld) {
        3
    } else {
        2
    };
    labels[labels.len() - keep..].join(".")
}

/// Registrable domain of a URL, used as the per-domain cap key.
pub fn domain_key(raw: &str) -> Option<String> {
    host_of(raw).map(|h| registrable_domain(&h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/Path"),
            "https://example.com/Path"
        );
    }

    #[test]
    fn removes_default_ports() {
        assert_eq!(
            normalize_url("http://example.com:80/a"),
            "http://example.com/a"
        );
        assert_eq!(
            normalize_url("https://example.com:443/a"),
            "https://example.com/a"
        );
        assert_eq!(
            normalize_url("https://example.com:8443/a"),
            "https://example.com:8443/a"
        );
    }

    #[test]
    fn removes_trailing_slashes() {
        assert_eq!(normalize_url("https://example.com/path/"), "https://example.com/path");
        assert_eq!(normalize_url("https://example.com/path//"), "https://example.com/path");
        assert_eq!(normalize_url("https://example.com"), "https://example.com/");
        assert_eq!(normalize_url("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn strips_tracking_and_sorts() {
        let result =
            normalize_url("https://example.com/p?utm_source=x&z=1&share_from=qq&a=2&fbclid=abc");
        assert_eq!(result, "https://example.com/p?a=2&z=1");
    }

    #[test]
    fn tracking_only_query_is_removed() {
        assert_eq!(
            normalize_url("https://example.com/p?utm_medium=email&gclid=1"),
            "https://example.com/p"
        );
    }

    #[test]
    fn removes_fragment() {
        assert_eq!(
            normalize_url("https://example.com/doc#section-2"),
            "https://example.com/doc"
        );
    }

    #[test]
    fn parameter_order_does_not_matter() {
        let a = normalize_url("https://example.com/s?q=rust&page=2&utm_campaign=x");
        let b = normalize_url("https://example.com/s?utm_campaign=y&page=2&q=rust");
        assert_eq!(a, b);
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            "HTTPS://Example.COM:443/a/b/?z=1&a=hello world&utm_source=x#frag",
            "https://example.com/?",
            "//cdn.example.com/lib.js",
            "www.example.org/docs/",
            "https://duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpage%2F%3Fb%3D1%26a%3D2",
            "https://example.com/search?q=a%2Bb&tag=%7Erust",
            "https://example.com/p?x=1&x=0",
            "https://www.google.com/url/?q=https://example.com/a",
            "https://www.youtube.com/redirect/?q=https://example.com/v",
            "https://duckduckgo.com/l?uddg=https%3A%2F%2Fexample.com%2Fx",
            "https://duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.google.com%2Furl%2F%3Fq%3Dhttps%3A%2F%2Fexample.com%2Fa",
            "not a url",
        ];
        for input in inputs {
            let once = normalize_url(input);
            let twice = normalize_url(&once);
            assert_eq!(once, twice, "not idempotent for {input}");
        }
    }

    #[test]
    fn coerces_scheme_relative_and_www() {
        assert_eq!(
            normalize_url("//example.com/a"),
            "https://example.com/a"
        );
        assert_eq!(
            normalize_url("www.example.com/a"),
            "https://www.example.com/a"
        );
    }

    #[test]
    fn unwraps_duckduckgo_redirect() {
        let wrapped =
            "https://duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Farticle%3Futm_source%3Dddg&rut=abc";
        assert_eq!(normalize_url(wrapped), "https://example.com/article");
    }

    #[test]
    fn unwraps_other_redirectors() {
        assert_eq!(
            unwrap_redirect("https://www.google.com/url?q=https://rust-lang.org/&sa=U").as_deref(),
            Some("https://rust-lang.org/")
        );
        assert_eq!(
            unwrap_redirect("https://link.zhihu.com/?target=https%3A//github.com/tokio-rs")
                .as_deref(),
            Some("https://github.com/tokio-rs")
        );
        assert_eq!(
            unwrap_redirect("https://l.facebook.com/l.php?u=https%3A%2F%2Fexample.com%2F")
                .as_deref(),
            Some("https://example.com/")
        );
        assert_eq!(
            unwrap_redirect("https://steamcommunity.com/linkfilter/?url=https://example.com")
                .as_deref(),
            Some("https://example.com")
        );
    }

    #[test]
    fn leaves_unknown_hosts_alone() {
        assert!(unwrap_redirect("https://example.com/l/?uddg=https://other.com").is_none());
        assert!(unwrap_redirect("https://www.google.com/search?q=https://x.com").is_none());
    }

    #[test]
    fn does_not_unwrap_nested_wrappers() {
        let nested = "https://duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.google.com%2Furl%3Fq%3Dhttps%3A%2F%2Fexample.com";
        assert!(unwrap_redirect(nested).is_none());
        let once = normalize_url(nested);
        assert_eq!(normalize_url(&once), once);
    }

    #[test]
    fn ignores_non_http_redirect_targets() {
        assert!(unwrap_redirect("https://duckduckgo.com/l/?uddg=javascript:alert(1)").is_none());
    }

    #[test]
    fn unparseable_input_is_returned() {
        assert_eq!(normalize_url("  not a url "), "not a url");
        assert_eq!(normalize_url("ftp://example.com/file"), "ftp://example.com/file");
    }

    #[test]
    fn registrable_domains() {
        assert_eq!(registrable_domain("www.example.com"), "example.com");
        assert_eq!(registrable_domain("docs.rs"), "docs.rs");
        assert_eq!(registrable_domain("news.bbc.co.uk"), "bbc.co.uk");
        assert_eq!(registrable_domain("blog.csdn.net"), "csdn.net");
        assert_eq!(registrable_domain("a.b.example.com.cn"), "example.com.cn");
        assert_eq!(registrable_domain("127.0.0.1"), "127.0.0.1");
    }

    #[test]
    fn host_matching() {
        assert!(host_matches("en.wikipedia.org", "wikipedia.org"));
        assert!(host_matches("wikipedia.org", "wikipedia.org"));
        assert!(host_matches("WikiPedia.org", "wikipedia.org"));
        assert!(!host_matches("notwikipedia.org", "wikipedia.org"));
        assert!(!host_matches("org", "wikipedia.org"));
    }

    #[test]
    fn domain_key_of_url() {
        assert_eq!(
            domain_key("https://user.github.io/post").as_deref(),
            Some("github.io")
        );
        assert_eq!(domain_key("nonsense"), None);
    }
}
