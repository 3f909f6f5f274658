use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::runtime::normalize_for_display;

/// Per-page front matter consumed by the build hooks. Pages without front
/// matter simply have no entry in the map.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct PageMeta {
    /// Explicit TOC category label, overriding the path-prefix table.
    pub toc_category: Option<String>,
    /// Comma-separated related-link specifiers.
    pub relatedlinks: Option<String>,
    /// Comma-separated forum topic IDs.
    pub discourse: Option<String>,
}

impl PageMeta {
    pub fn is_empty(&self) -> bool {
        self.toc_category.is_none() && self.relatedlinks.is_none() && self.discourse.is_none()
    }
}

/// Walk the doc tree and collect front matter for every Markdown page, keyed
/// by the page path relative to `doc_root` without the `.md` extension.
pub fn scan_metadata(doc_root: &Path) -> Result<BTreeMap<String, PageMeta>> {
    let mut pages = BTreeMap::new();
    if !doc_root.exists() {
        return Ok(pages);
    }

    for entry in WalkDir::new(doc_root).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", doc_root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
            continue;
        }
        // Build state under .doctool/ is not site content.
        if path
            .strip_prefix(doc_root)
            .ok()
            .and_then(|rel| rel.components().next())
            .is_some_and(|first| first.as_os_str() == crate::runtime::STATE_DIR_NAME)
        {
            continue;
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let Some(front_matter) = extract_front_matter(&content) else {
            continue;
        };
        let meta: PageMeta = serde_yaml::from_str(front_matter)
            .with_context(|| format!("failed to parse front matter of {}", path.display()))?;
        if meta.is_empty() {
            continue;
        }

        let rel = path.strip_prefix(doc_root).with_context(|| {
            format!(
                "failed to derive relative path from root {} for {}",
                doc_root.display(),
                path.display()
            )
        })?;
        let key = normalize_for_display(rel);
        let key = key.strip_suffix(".md").unwrap_or(&key).to_string();
        pages.insert(key, meta);
    }
    Ok(pages)
}

/// Return the YAML body between the leading `---` fence pair, or `None` when
/// the page carries no front matter.
fn extract_front_matter(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("---\n").or_else(|| {
        content.strip_prefix("---\r\n")
    })?;
    let end = rest.find("\n---")?;
    // The closing fence must sit on its own line.
    let after = &rest[end + 4..];
    if !(after.is_empty() || after.starts_with('\n') || after.starts_with("\r\n")) {
        return None;
    }
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{extract_front_matter, scan_metadata};

    #[test]
    fn front_matter_extraction() {
        let body = "---\ntoc_category: How-to\n---\n# Page\n";
        assert_eq!(
            extract_front_matter(body),
            Some("toc_category: How-to\n")
        );
        assert_eq!(extract_front_matter("# Page without front matter\n"), None);
        assert_eq!(extract_front_matter("---\nunterminated\n"), None);
    }

    #[test]
    fn scan_collects_pages_keyed_without_extension() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("howto")).expect("create howto");
        fs::write(
            root.join("howto/storage.md"),
            "---\ntoc_category: How-to guides\nrelatedlinks: \"[Example](https://example.com)\"\n---\n# Storage\n",
        )
        .expect("write page");
        fs::write(root.join("index.md"), "# Index, no front matter\n").expect("write index");

        let pages = scan_metadata(root).expect("scan");
        assert_eq!(pages.len(), 1);
        let meta = pages.get("howto/storage").expect("storage meta");
        assert_eq!(meta.toc_category.as_deref(), Some("How-to guides"));
        assert_eq!(
            meta.relatedlinks.as_deref(),
            Some("[Example](https://example.com)")
        );
    }

    #[test]
    fn scan_skips_build_state_dir() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join(".doctool/manpages")).expect("create state");
        fs::write(
            root.join(".doctool/manpages/lxc.md"),
            "---\ntoc_category: nope\n---\n",
        )
        .expect("write staged page");

        let pages = scan_metadata(root).expect("scan");
        assert!(pages.is_empty());
    }

    #[test]
    fn scan_rejects_malformed_front_matter() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("bad.md"), "---\ntoc_category: [oops\n---\n").expect("write page");
        let error = scan_metadata(root).expect_err("must fail");
        assert!(error.to_string().contains("front matter"));
    }

    #[test]
    fn scan_ignores_unknown_front_matter_keys() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(
            root.join("page.md"),
            "---\ndiscourse: \"12033,13128\"\nunrelated: value\n---\n# Page\n",
        )
        .expect("write page");
        let pages = scan_metadata(root).expect("scan");
        assert_eq!(
            pages.get("page").and_then(|meta| meta.discourse.as_deref()),
            Some("12033,13128")
        );
    }
}
