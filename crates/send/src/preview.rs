//! Open Graph scraping for link previews.

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;

#[allow(clippy::unwrap_used)]
static META_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").unwrap());

#[allow(clippy::unwrap_used)]
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>/]+))"#).unwrap()
});

/// Metadata scraped from a page's `og:*` meta tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenGraph {
    props: HashMap<String, String>,
}

impl OpenGraph {
    /// Collect every `<meta property="og:NAME" content="...">` of `html`,
    /// keyed by `NAME`. The first occurrence of a property wins.
    pub fn parse(html: &str) -> Self {
        let mut props = HashMap::new();
        for tag in META_TAG.find_iter(html) {
            let mut property = None;
            let mut content = None;
            for caps in ATTRIBUTE.captures_iter(tag.as_str()) {
                let value = caps
                    .get(2)
                    .or_else(|| caps.get(3))
                    .or_else(|| caps.get(4))
                    .map(|m| decode_entities(m.as_str()));
                match caps[1].to_ascii_lowercase().as_str() {
                    "property" => property = value,
                    "content" => content = value,
                    _ => {},
                }
            }
            if let (Some(property), Some(content)) = (property, content)
                && let Some(name) = property.strip_prefix("og:")
                && !content.is_empty()
            {
                props.entry(name.to_string()).or_insert(content);
            }
        }
        Self { props }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.props.get(name).map(String::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.get("title")
    }

    pub fn description(&self) -> Option<&str> {
        self.get("description")
    }

    pub fn image(&self) -> Option<&str> {
        self.get("image")
    }

    /// Declared image size, only when both sides are positive.
    pub fn image_size(&self) -> Option<(u32, u32)> {
        let w: u32 = self.get("image:width")?.trim().parse().ok()?;
        let h: u32 = self.get("image:height")?.trim().parse().ok()?;
        (w > 0 && h > 0).then_some((w, h))
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html><head>
  <meta charset="utf-8">
  <meta property="og:title" content="Chatgate &amp; friends">
  <meta content='Multi-tenant gateway' property='og:description' />
  <meta property="og:image" content="https://example.com/cover.jpg">
  <meta property="og:image" content="https://example.com/second.jpg">
  <meta property="og:image:width" content="1200">
  <meta property="og:image:height" content="630">
  <meta name="description" content="not open graph">
  <meta property="og:site_name" content="">
</head><body></body></html>"#;

    #[test]
    fn scrapes_og_properties() {
        let og = OpenGraph::parse(PAGE);
        assert_eq!(og.title(), Some("Chatgate & friends"));
        assert_eq!(og.description(), Some("Multi-tenant gateway"));
        assert_eq!(og.image(), Some("https://example.com/cover.jpg"));
        assert_eq!(og.image_size(), Some((1200, 630)));
        assert!(og.get("site_name").is_none());
        assert!(og.get("description").is_some());
    }

    #[test]
    fn zero_sized_image_has_no_size() {
        let og = OpenGraph::parse(
            r#"<meta property="og:image:width" content="0"><meta property="og:image:height" content="10">"#,
        );
        assert!(og.image_size().is_none());
    }

    #[test]
    fn plain_page_yields_nothing() {
        assert!(OpenGraph::parse("<html><title>x</title></html>").is_empty());
    }
}
