// src/interaction/locator.rs
//! Structural locators
//!
//! A locator is a selector-like path (`div#ad > a:nth-of-type(2) > img`)
//! that re-finds an element in a freshly loaded copy of the same content.
//! Paths are anchored at the nearest ancestor with a usable id.

use serde::{Deserialize, Serialize};

/// One element on the path from the document root to the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    /// Lower-case tag name
    pub tag: String,

    /// Element id, if any
    pub id: Option<String>,

    /// 1-based position among siblings with the same tag
    pub nth_of_type: usize,

    /// Number of siblings (including itself) with the same tag
    pub siblings_of_type: usize,
}

impl PathSegment {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            id: None,
            nth_of_type: 1,
            siblings_of_type: 1,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn nth(mut self, nth_of_type: usize, siblings_of_type: usize) -> Self {
        self.nth_of_type = nth_of_type;
        self.siblings_of_type = siblings_of_type;
        self
    }

    fn usable_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| {
            !id.is_empty()
                && !id.starts_with(|c: char| c.is_ascii_digit())
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
    }

    fn render(&self) -> String {
        let tag = self.tag.to_ascii_lowercase();
        if let Some(id) = self.usable_id() {
            return format!("{}#{}", tag, id);
        }
        if self.siblings_of_type > 1 {
            format!("{}:nth-of-type({})", tag, self.nth_of_type.max(1))
        } else {
            tag
        }
    }
}

/// Builds a locator from an ancestor chain ordered root → target
pub fn build_locator(chain: &[PathSegment]) -> Option<String> {
    if chain.is_empty() {
        return None;
    }

    // anchor at the deepest ancestor (or the target itself) with a usable id
    let anchor = chain
        .iter()
        .rposition(|s| s.usable_id().is_some())
        .unwrap_or(0);

    let path: Vec<String> = chain[anchor..]
        .iter()
        .filter(|s| !s.tag.is_empty())
        .map(PathSegment::render)
        .collect();

    if path.is_empty() {
        None
    } else {
        Some(path.join(" > "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path() {
        let chain = vec![
            PathSegment::new("html"),
            PathSegment::new("body"),
            PathSegment::new("div").nth(2, 3),
            PathSegment::new("a"),
        ];
        assert_eq!(
            build_locator(&chain).unwrap(),
            "html > body > div:nth-of-type(2) > a"
        );
    }

    #[test]
    fn test_anchored_at_id() {
        let chain = vec![
            PathSegment::new("html"),
            PathSegment::new("body"),
            PathSegment::new("div").with_id("ad-root"),
            PathSegment::new("A").nth(1, 2),
        ];
        assert_eq!(
            build_locator(&chain).unwrap(),
            "div#ad-root > a:nth-of-type(1)"
        );
    }

    #[test]
    fn test_unusable_ids_ignored() {
        let chain = vec![
            PathSegment::new("body"),
            PathSegment::new("div").with_id("3d view"),
        ];
        assert_eq!(build_locator(&chain).unwrap(), "body > div");
    }

    #[test]
    fn test_empty_chain() {
        assert!(build_locator(&[]).is_none());
    }
}
