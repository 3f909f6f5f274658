use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::config::TocCategory;
use crate::metadata::PageMeta;

/// Internal TOC anchors as the site generator renders them. Anything that
/// doesn't match passes through untouched, so malformed fragments are safe.
static TOC_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a class="reference internal" href="([^"]+)">"#).expect("valid regex")
});

/// Annotate a rendered TOC fragment with one `data-category` attribute per
/// anchor whose target page resolves to a category. The category comes from
/// the target page's explicit `toc_category` front matter, else from the
/// longest matching prefix in the configured category table. Anchors without
/// a category are left byte-identical.
pub fn annotate_toc(
    html: &str,
    page: &str,
    metadata: &BTreeMap<String, PageMeta>,
    categories: &[TocCategory],
) -> String {
    TOC_ANCHOR
        .replace_all(html, |captures: &Captures| {
            let href = &captures[1];
            let Some(target) = resolve_target(page, href) else {
                return captures[0].to_string();
            };
            match category_for(&target, metadata, categories) {
                Some(label) => format!(
                    r#"<a class="reference internal" href="{href}" data-category="{label}">"#
                ),
                None => captures[0].to_string(),
            }
        })
        .to_string()
}

/// Resolve an href relative to the current page's directory into a doc-tree
/// page path: fragments and a trailing `.html` are stripped, `/index` is
/// collapsed, and `..` segments are normalized.
pub fn resolve_target(page: &str, href: &str) -> Option<String> {
    let href = href.split('#').next().unwrap_or("");
    if href.is_empty() || href.contains("://") {
        return None;
    }

    let base = match page.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    };

    let mut segments: Vec<&str> = base.split('/').filter(|part| !part.is_empty()).collect();
    for part in href.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }

    let mut target = segments.join("/");
    if let Some(stripped) = target.strip_suffix(".html") {
        target = stripped.to_string();
    }
    if let Some(stripped) = target.strip_suffix("/index") {
        target = stripped.to_string();
    }
    if target.is_empty() {
        return None;
    }
    Some(target)
}

fn category_for(
    target: &str,
    metadata: &BTreeMap<String, PageMeta>,
    categories: &[TocCategory],
) -> Option<String> {
    // Index pages are keyed with their `/index` suffix in the metadata map,
    // while resolve_target collapses it; try both spellings.
    if let Some(label) = metadata
        .get(target)
        .or_else(|| metadata.get(&format!("{target}/index")))
        .and_then(|meta| meta.toc_category.clone())
    {
        return Some(label);
    }

    categories
        .iter()
        .filter(|category| target.starts_with(&category.prefix))
        .max_by_key(|category| category.prefix.len())
        .map(|category| category.label.clone())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{annotate_toc, resolve_target};
    use crate::config::TocCategory;
    use crate::metadata::PageMeta;

    fn categories() -> Vec<TocCategory> {
        vec![
            TocCategory {
                prefix: "howto/".to_string(),
                label: "How-to guides".to_string(),
            },
            TocCategory {
                prefix: "howto/storage".to_string(),
                label: "Storage guides".to_string(),
            },
            TocCategory {
                prefix: "reference/".to_string(),
                label: "Reference".to_string(),
            },
        ]
    }

    #[test]
    fn resolve_target_handles_relative_segments() {
        assert_eq!(
            resolve_target("howto/networking", "../reference/devices.html#usb"),
            Some("reference/devices".to_string())
        );
        assert_eq!(
            resolve_target("index", "howto/storage.html"),
            Some("howto/storage".to_string())
        );
        assert_eq!(
            resolve_target("howto/index", "instances/index.html"),
            Some("howto/instances".to_string())
        );
        assert_eq!(resolve_target("index", "https://example.com/page.html"), None);
        assert_eq!(resolve_target("index", "#section-only"), None);
    }

    #[test]
    fn annotates_matching_anchors_only() {
        let metadata = BTreeMap::from([(
            "explanation/security".to_string(),
            PageMeta {
                toc_category: Some("Security".to_string()),
                ..PageMeta::default()
            },
        )]);
        let html = concat!(
            r#"<li class="toctree-l1"><a class="reference internal" href="howto/storage.html">Storage</a></li>"#,
            r#"<li class="toctree-l1"><a class="reference internal" href="explanation/security.html">Security</a></li>"#,
            r#"<li class="toctree-l1"><a class="reference internal" href="contributing.html">Contributing</a></li>"#,
        );

        let annotated = annotate_toc(html, "index", &metadata, &categories());
        assert!(annotated.contains(
            r#"href="howto/storage.html" data-category="Storage guides""#
        ));
        assert!(annotated.contains(
            r#"href="explanation/security.html" data-category="Security""#
        ));
        // The uncategorized anchor stays untouched.
        assert!(annotated.contains(
            r#"<a class="reference internal" href="contributing.html">Contributing</a>"#
        ));
        assert_eq!(annotated.matches("data-category").count(), 2);
    }

    #[test]
    fn explicit_metadata_wins_over_prefix_table() {
        let metadata = BTreeMap::from([(
            "howto/storage".to_string(),
            PageMeta {
                toc_category: Some("Pinned".to_string()),
                ..PageMeta::default()
            },
        )]);
        let html = r#"<a class="reference internal" href="howto/storage.html">"#;
        let annotated = annotate_toc(html, "index", &metadata, &categories());
        assert!(annotated.contains(r#"data-category="Pinned""#));
    }

    #[test]
    fn index_page_metadata_is_found_despite_suffix_collapse() {
        let metadata = BTreeMap::from([(
            "howto/instances/index".to_string(),
            PageMeta {
                toc_category: Some("Instances".to_string()),
                ..PageMeta::default()
            },
        )]);
        let html = r#"<a class="reference internal" href="howto/instances/index.html">"#;
        let annotated = annotate_toc(html, "index", &metadata, &categories());
        assert!(annotated.contains(r#"data-category="Instances""#));
    }

    #[test]
    fn unmatched_input_passes_through_byte_identical() {
        let html = "<ul><li>not a toc anchor</li></ul>";
        assert_eq!(
            annotate_toc(html, "index", &BTreeMap::new(), &categories()),
            html
        );

        let malformed = r#"<a class="reference internal" href="unclosed"#;
        assert_eq!(
            annotate_toc(malformed, "index", &BTreeMap::new(), &categories()),
            malformed
        );
    }

    #[test]
    fn anchors_without_category_are_untouched() {
        let html = r#"<a class="reference internal" href="tutorial/first_steps.html">"#;
        assert_eq!(
            annotate_toc(html, "index", &BTreeMap::new(), &categories()),
            html
        );
    }
}
