use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "doctool/0.2";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MANPAGE_FORMAT: &str = "md";
pub const DEFAULT_MANPAGE_TARGET_DIR: &str = "reference/manpages";

/// Environment variable toggling the topical content set. Anything other
/// than `True`/`true`/`1` selects the diataxis set.
pub const TOPICAL_ENV_VAR: &str = "DOCTOOL_TOPICAL";

const DEFAULT_SUBSTITUTION_FILES: &[&str] = &["substitutions.yaml", "related_topics.yaml"];

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct BuildConfig {
    #[serde(default)]
    pub site: SiteSection,
    #[serde(default)]
    pub links: LinksSection,
    #[serde(default)]
    pub manpages: ManpagesSection,
    #[serde(default)]
    pub toc: TocSection,
    #[serde(default)]
    pub redirects: Vec<Redirect>,
    #[serde(default)]
    pub requirements: RequirementsSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct SiteSection {
    /// Forum name -> topic URL prefix, e.g. `ubuntu = "https://discourse.ubuntu.com/t/"`.
    #[serde(default)]
    pub discourse_prefixes: BTreeMap<String, String>,
    #[serde(default)]
    pub substitution_files: Vec<String>,
}

impl SiteSection {
    pub fn substitution_files(&self) -> Vec<String> {
        if self.substitution_files.is_empty() {
            DEFAULT_SUBSTITUTION_FILES
                .iter()
                .map(ToString::to_string)
                .collect()
        } else {
            self.substitution_files.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct LinksSection {
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl LinksSection {
    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ManpagesSection {
    /// Path to the external man-page generator binary. Generation fails
    /// when unset; the build environment must configure it explicitly.
    pub generator: Option<String>,
    pub format: Option<String>,
    pub target_dir: Option<String>,
}

impl ManpagesSection {
    pub fn format(&self) -> &str {
        self.format.as_deref().unwrap_or(DEFAULT_MANPAGE_FORMAT)
    }

    pub fn target_dir(&self) -> &str {
        self.target_dir
            .as_deref()
            .unwrap_or(DEFAULT_MANPAGE_TARGET_DIR)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct TocSection {
    #[serde(default)]
    pub categories: Vec<TocCategory>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TocCategory {
    pub prefix: String,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Redirect {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct RequirementsSection {
    #[serde(default)]
    pub extras: Vec<String>,
}

/// Load the build configuration from a TOML file. A missing file yields the
/// defaults; a malformed file is fatal.
pub fn load_config(config_path: &Path) -> Result<BuildConfig> {
    if !config_path.exists() {
        return Ok(BuildConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BuildConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Which of the two alternate content sets a build publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentVariant {
    Diataxis,
    Topical,
}

impl ContentVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Diataxis => "diataxis",
            Self::Topical => "topical",
        }
    }

    pub fn from_env() -> Self {
        match env::var(TOPICAL_ENV_VAR) {
            Ok(value) if matches!(value.trim(), "True" | "true" | "1") => Self::Topical,
            _ => Self::Diataxis,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentSet {
    pub variant: ContentVariant,
    pub tag: String,
    pub excludes: Vec<String>,
    pub redirects: Vec<Redirect>,
    pub toc_filter_exclude: String,
}

/// Merge the base redirect table with the per-variant excludes, redirects,
/// and tags. Each variant excludes the other's index pages so only one
/// navigation tree is published per build.
pub fn content_set(config: &BuildConfig, variant: ContentVariant) -> ContentSet {
    let mut excludes = Vec::new();
    let mut redirects = config.redirects.clone();

    match variant {
        ContentVariant::Topical => {
            excludes.extend(
                [
                    "tutorial/index.md",
                    "howto/index.md",
                    "explanation/index.md",
                    "reference/index.md",
                    "howto/troubleshoot.md",
                ]
                .map(ToString::to_string),
            );
            redirects.push(Redirect {
                from: "index_topical/index".to_string(),
                to: "../index.html".to_string(),
            });
            redirects.push(Redirect {
                from: "index_topical".to_string(),
                to: "../index.html".to_string(),
            });
            ContentSet {
                variant,
                tag: "topical".to_string(),
                excludes,
                redirects,
                toc_filter_exclude: "diataxis".to_string(),
            }
        }
        ContentVariant::Diataxis => {
            excludes.extend(
                [
                    "security.md",
                    "external_resources.md",
                    "reference/network_external.md",
                    "index_topical.md",
                ]
                .map(ToString::to_string),
            );
            redirects.push(Redirect {
                from: "security/index".to_string(),
                to: "../explanation/security/".to_string(),
            });
            ContentSet {
                variant,
                tag: "diataxis".to_string(),
                excludes,
                redirects,
                toc_filter_exclude: "topical".to_string(),
            }
        }
    }
}

/// Merge the configured YAML substitution files in order; later files win on
/// key collisions. Missing files are skipped, unparsable files are fatal.
pub fn load_substitutions(
    doc_root: &Path,
    files: &[String],
) -> Result<BTreeMap<String, serde_yaml::Value>> {
    let mut merged = BTreeMap::new();
    for name in files {
        let path = doc_root.join(name);
        if !path.exists() {
            continue;
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let parsed: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        merged.extend(parsed);
    }
    Ok(merged)
}
