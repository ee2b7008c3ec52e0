// src/utils/link_header.rs

//! RFC 5988 `Link` response header parsing.
//!
//! Collection responses advertise pagination as
//! `<https://…?page=2>; rel="next", <https://…?page=7>; rel="last"`.

use std::collections::HashMap;

use regex::Regex;
use std::sync::OnceLock;

use crate::utils::page_number;

/// Pagination cursors extracted from a `Link` header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLinks {
    pub next: Option<u32>,
    pub last: Option<u32>,
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<([^>]+)>\s*;\s*rel="([a-z]+)""#).expect("link header pattern is valid")
    })
}

/// Parse relation name to target URL pairs out of a `Link` header.
pub fn parse_rels(header: &str) -> HashMap<String, String> {
    link_pattern()
        .captures_iter(header)
        .map(|caps| (caps[2].to_string(), caps[1].to_string()))
        .collect()
}

/// Parse the `next`/`last` page numbers out of a `Link` header.
pub fn parse_page_links(header: &str) -> PageLinks {
    let rels = parse_rels(header);
    PageLinks {
        next: rels.get("next").and_then(|url| page_number(url)),
        last: rels.get("last").and_then(|url| page_number(url)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = concat!(
        "<https://api.example.com/repos/acme/widget/issues?page=2>; rel=\"next\", ",
        "<https://api.example.com/repos/acme/widget/issues?page=7>; rel=\"last\""
    );

    #[test]
    fn test_parse_rels() {
        let rels = parse_rels(HEADER);
        assert_eq!(rels.len(), 2);
        assert!(rels["next"].contains("page=2"));
        assert!(rels["last"].contains("page=7"));
    }

    #[test]
    fn test_parse_page_links() {
        let links = parse_page_links(HEADER);
        assert_eq!(links.next, Some(2));
        assert_eq!(links.last, Some(7));
    }

    #[test]
    fn test_parse_empty_header() {
        assert_eq!(parse_page_links(""), PageLinks::default());
    }
}
