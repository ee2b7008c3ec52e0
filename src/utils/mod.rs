// src/utils/mod.rs

//! Utility functions and helpers.

pub mod link_header;

use url::Url;

/// Extract the page number from a URL's `page` query parameter.
pub fn page_number(url_str: &str) -> Option<u32> {
    let url = Url::parse(url_str).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse().ok())
}

/// Return a copy of the URL with the `page` query parameter set to `page`.
pub fn with_page(url_str: &str, page: u32) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut updated = url;
    {
        let mut pairs = updated.query_pairs_mut();
        pairs.clear();
        for (key, value) in &retained {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("page", &page.to_string());
    }
    Some(updated.to_string())
}

/// Extract the organization login from an API resource path.
///
/// Works for `/repos/{org}/{name}` and `/orgs/{org}` shapes, where the
/// org is the second path segment.
pub fn org_from_url(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    let mut segments = url.path_segments()?;
    segments.next()?;
    segments.next().map(|s| s.to_string())
}

/// Strip a URI-template suffix such as `{/number}` from a hypermedia URL.
pub fn trim_url_template(url: &str) -> String {
    match url.find('{') {
        Some(index) => url[..index].to_string(),
        None => url.to_string(),
    }
}
