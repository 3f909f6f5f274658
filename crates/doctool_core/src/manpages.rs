use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sha2::{Digest, Sha256};
use similar::TextDiff;
use walkdir::WalkDir;

use crate::config::BuildConfig;
use crate::runtime::{ResolvedPaths, normalize_for_display};

const AUTO_GENERATED_MARKER: &str = "###### Auto generated";

#[derive(Debug, Clone, Default)]
pub struct ManpageOptions {
    /// Reuse an already populated staging directory instead of invoking the
    /// generator binary.
    pub skip_generate: bool,
    /// Collect unified diffs of the pages that changed since the last sync.
    pub show_diff: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopiedPage {
    pub relative_path: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManpageReport {
    pub generated: bool,
    pub exploded_pages: usize,
    pub toctree_parents: usize,
    pub copied: Vec<CopiedPage>,
    pub unchanged_files: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diffs: Vec<String>,
}

/// Full preprocessor pipeline: generate raw pages, explode the flat
/// underscore-delimited names into a directory tree, rewrite headings, wire
/// the tree into the site navigation, and publish only changed files.
pub fn build_manpages(
    paths: &ResolvedPaths,
    config: &BuildConfig,
    options: &ManpageOptions,
) -> Result<ManpageReport> {
    let staging = &paths.manpage_staging_dir;
    let generated = if options.skip_generate {
        if !staging.exists() {
            bail!(
                "manpage staging directory is missing: {} (remove --skip-generate or populate it)",
                normalize_for_display(staging)
            );
        }
        false
    } else {
        generate_pages(staging, config)?;
        true
    };

    let exploded_pages = explode_pages(staging)?;
    let toctree_parents = append_toctrees(staging)?;

    let target = paths.manpage_target_dir(config.manpages.target_dir());
    let (copied, unchanged_files, diffs) = sync_changed(staging, &target, options.show_diff)?;

    Ok(ManpageReport {
        generated,
        exploded_pages,
        toctree_parents,
        copied,
        unchanged_files,
        diffs,
    })
}

/// Invoke the configured generator binary to write raw Markdown pages into a
/// clean staging directory. A missing setting, missing binary, or non-zero
/// exit aborts the build.
fn generate_pages(staging: &Path, config: &BuildConfig) -> Result<()> {
    let Some(generator) = config.manpages.generator.as_deref() else {
        bail!(
            "manpages.generator is not configured; set it in the build config to the man-page generator binary"
        );
    };

    if staging.exists() {
        fs::remove_dir_all(staging)
            .with_context(|| format!("failed to clear {}", staging.display()))?;
    }
    fs::create_dir_all(staging)
        .with_context(|| format!("failed to create {}", staging.display()))?;

    let status = Command::new(generator)
        .arg(staging)
        .arg(format!("--format={}", config.manpages.format()))
        .status()
        .with_context(|| format!("failed to run man-page generator {generator}"))?;
    if !status.success() {
        bail!("man-page generator {generator} exited with {status}");
    }
    Ok(())
}

/// Turn every flat `a_b_c.md` file in the staging root into `a/b/c.md`,
/// rewriting its content on the way. The flat source is removed unless the
/// name carries no underscore, in which case the file is rewritten in place.
fn explode_pages(staging: &Path) -> Result<usize> {
    let mut flat_pages = Vec::new();
    let entries = fs::read_dir(staging)
        .with_context(|| format!("failed to list {}", staging.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", staging.display()))?;
        if entry
            .file_type()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?
            .is_file()
        {
            flat_pages.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    flat_pages.sort();

    for page in &flat_pages {
        let source = staging.join(page);
        let content = fs::read_to_string(&source)
            .with_context(|| format!("failed to read {}", source.display()))?;

        let page_path = staging.join(page.replace('_', "/"));
        if let Some(parent) = page_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&page_path, rewrite_page(page, &content))
            .with_context(|| format!("failed to write {}", page_path.display()))?;

        if page.contains('_') {
            fs::remove_file(&source)
                .with_context(|| format!("failed to remove {}", source.display()))?;
        }
    }
    Ok(flat_pages.len())
}

/// Content rewrite for one generated page: a leading anchor derived from the
/// original flat name, the `## command` title restyled as `` # `command` ``,
/// every other heading demoted one level, and the auto-generation marker
/// dropped.
fn rewrite_page(flat_name: &str, content: &str) -> String {
    let mut output = format!("({flat_name})=\n");
    for line in content.lines() {
        if line.starts_with(AUTO_GENERATED_MARKER) {
            continue;
        }
        if let Some(title) = line.strip_prefix("## ") {
            output.push_str(&format!("# `{}`\n", title.trim_end()));
        } else if let Some(rest) = line.strip_prefix("##") {
            output.push('#');
            output.push_str(rest);
            output.push('\n');
        } else {
            output.push_str(line);
            output.push('\n');
        }
    }
    output
}

/// For every directory with subdirectories, append a hidden glob toctree to
/// the sibling parent page so the exploded tree shows up in the site
/// navigation. Already-wired parents are left alone, keeping the step
/// re-runnable over a reused staging tree.
fn append_toctrees(staging: &Path) -> Result<usize> {
    let mut appended = 0usize;
    for entry in WalkDir::new(staging).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", staging.display()))?;
        if !entry.file_type().is_dir() || entry.path() == staging {
            continue;
        }

        let subdir = entry
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let parent_page = entry
            .path()
            .parent()
            .map(|parent| parent.join(format!("{subdir}.md")))
            .unwrap_or_default();

        let block = toctree_block(&subdir);
        let existing = if parent_page.exists() {
            fs::read_to_string(&parent_page)
                .with_context(|| format!("failed to read {}", parent_page.display()))?
        } else {
            String::new()
        };
        if existing.contains(&block) {
            continue;
        }
        fs::write(&parent_page, format!("{existing}{block}"))
            .with_context(|| format!("failed to write {}", parent_page.display()))?;
        appended += 1;
    }
    Ok(appended)
}

fn toctree_block(subdir: &str) -> String {
    format!("```{{toctree}}\n:titlesonly:\n:glob:\n:hidden:\n\n{subdir}/*\n```\n")
}

/// Copy staged pages into the published tree, but only those whose bytes
/// differ from the previous output; copying everything would defeat the site
/// generator's incremental build.
fn sync_changed(
    staging: &Path,
    target: &Path,
    show_diff: bool,
) -> Result<(Vec<CopiedPage>, usize, Vec<String>)> {
    let mut copied = Vec::new();
    let mut unchanged = 0usize;
    let mut diffs = Vec::new();

    for entry in WalkDir::new(staging).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", staging.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let source = entry.path();
        let relative = source.strip_prefix(staging).with_context(|| {
            format!(
                "failed to derive relative path from {} for {}",
                staging.display(),
                source.display()
            )
        })?;
        let destination = target.join(relative);

        let source_bytes = fs::read(source)
            .with_context(|| format!("failed to read {}", source.display()))?;
        let previous_bytes = if destination.exists() {
            Some(
                fs::read(&destination)
                    .with_context(|| format!("failed to read {}", destination.display()))?,
            )
        } else {
            None
        };

        if previous_bytes.as_deref() == Some(source_bytes.as_slice()) {
            unchanged += 1;
            continue;
        }

        if show_diff {
            let old = previous_bytes
                .as_deref()
                .map(|bytes| String::from_utf8_lossy(bytes).to_string())
                .unwrap_or_default();
            let new = String::from_utf8_lossy(&source_bytes).to_string();
            let diff = TextDiff::from_lines(&old, &new)
                .unified_diff()
                .header(
                    &format!("previous/{}", normalize_for_display(relative)),
                    &format!("staged/{}", normalize_for_display(relative)),
                )
                .to_string();
            diffs.push(diff);
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&destination, &source_bytes)
            .with_context(|| format!("failed to write {}", destination.display()))?;
        copied.push(CopiedPage {
            relative_path: normalize_for_display(relative),
            content_hash: short_hash(&source_bytes),
        });
    }

    copied.sort_by(|left, right| left.relative_path.cmp(&right.relative_path));
    Ok((copied, unchanged, diffs))
}

fn short_hash(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{
        ManpageOptions, append_toctrees, build_manpages, explode_pages, rewrite_page,
        toctree_block,
    };
    use crate::config::BuildConfig;
    use crate::runtime::{PathOverrides, ResolutionContext, resolve_paths_with_lookup};

    fn resolved(root: &Path) -> crate::runtime::ResolvedPaths {
        let context = ResolutionContext {
            cwd: root.to_path_buf(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            doc_root: Some(root.to_path_buf()),
            ..PathOverrides::default()
        };
        resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve paths")
    }

    fn write_fixture(staging: &Path) {
        fs::create_dir_all(staging).expect("create staging");
        fs::write(
            staging.join("lxc.md"),
            "## lxc\nTop level command.\n### Options\n###### Auto generated by tooling on 1.1.1970\n",
        )
        .expect("write lxc.md");
        fs::write(
            staging.join("lxc_list.md"),
            "## lxc list\nList instances.\n### Examples\n",
        )
        .expect("write lxc_list.md");
        fs::write(
            staging.join("lxc_config_device.md"),
            "## lxc config device\nManage devices.\n",
        )
        .expect("write lxc_config_device.md");
    }

    #[test]
    fn rewrite_page_restyles_headings_and_drops_marker() {
        let rewritten = rewrite_page(
            "lxc_list.md",
            "## lxc list\nList instances.\n### Examples\n###### Auto generated by tooling\n",
        );
        assert_eq!(
            rewritten,
            "(lxc_list.md)=\n# `lxc list`\nList instances.\n## Examples\n"
        );
    }

    #[test]
    fn explode_relocates_underscore_names() {
        let temp = tempdir().expect("tempdir");
        let staging = temp.path().join("staging");
        write_fixture(&staging);

        let count = explode_pages(&staging).expect("explode");
        assert_eq!(count, 3);

        // lxc_list.md is relocated, lxc.md is rewritten in place.
        assert!(!staging.join("lxc_list.md").exists());
        assert!(staging.join("lxc.md").exists());
        assert!(staging.join("lxc/list.md").exists());
        assert!(staging.join("lxc/config/device.md").exists());

        let list = fs::read_to_string(staging.join("lxc/list.md")).expect("read list");
        assert!(list.starts_with("(lxc_list.md)=\n# `lxc list`\n"));
        let top = fs::read_to_string(staging.join("lxc.md")).expect("read lxc");
        assert!(top.starts_with("(lxc.md)=\n# `lxc`\n"));
        assert!(!top.contains("Auto generated"));
    }

    #[test]
    fn toctrees_wire_every_directory_once() {
        let temp = tempdir().expect("tempdir");
        let staging = temp.path().join("staging");
        write_fixture(&staging);
        explode_pages(&staging).expect("explode");

        let appended = append_toctrees(&staging).expect("append");
        // staging/lxc and staging/lxc/config both have parent pages.
        assert_eq!(appended, 2);

        let top = fs::read_to_string(staging.join("lxc.md")).expect("read lxc");
        assert!(top.ends_with(&toctree_block("lxc")));
        let config = fs::read_to_string(staging.join("lxc/config.md")).expect("read config");
        assert!(config.contains("```{toctree}\n:titlesonly:\n:glob:\n:hidden:\n\nconfig/*\n```\n"));

        // Re-running over the same staging tree appends nothing new.
        let appended_again = append_toctrees(&staging).expect("append again");
        assert_eq!(appended_again, 0);
    }

    #[test]
    fn build_copies_changed_files_and_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let paths = resolved(temp.path());
        let config = BuildConfig::default();

        write_fixture(&paths.manpage_staging_dir);
        let first = build_manpages(
            &paths,
            &config,
            &ManpageOptions {
                skip_generate: true,
                ..ManpageOptions::default()
            },
        )
        .expect("first build");
        assert!(!first.generated);
        assert_eq!(first.exploded_pages, 3);
        assert!(!first.copied.is_empty());
        assert_eq!(first.unchanged_files, 0);
        assert!(
            temp.path()
                .join("reference/manpages/lxc/list.md")
                .exists()
        );

        // Same generated input again: the copy step is a no-op.
        fs::remove_dir_all(&paths.manpage_staging_dir).expect("clear staging");
        write_fixture(&paths.manpage_staging_dir);
        let second = build_manpages(
            &paths,
            &config,
            &ManpageOptions {
                skip_generate: true,
                ..ManpageOptions::default()
            },
        )
        .expect("second build");
        assert!(second.copied.is_empty());
        assert_eq!(second.unchanged_files, first.copied.len());
    }

    #[test]
    fn build_reports_diffs_for_changed_pages() {
        let temp = tempdir().expect("tempdir");
        let paths = resolved(temp.path());
        let config = BuildConfig::default();

        write_fixture(&paths.manpage_staging_dir);
        build_manpages(
            &paths,
            &config,
            &ManpageOptions {
                skip_generate: true,
                ..ManpageOptions::default()
            },
        )
        .expect("first build");

        fs::remove_dir_all(&paths.manpage_staging_dir).expect("clear staging");
        write_fixture(&paths.manpage_staging_dir);
        fs::write(
            paths.manpage_staging_dir.join("lxc_list.md"),
            "## lxc list\nList instances with more detail.\n",
        )
        .expect("update page");

        let report = build_manpages(
            &paths,
            &config,
            &ManpageOptions {
                skip_generate: true,
                show_diff: true,
            },
        )
        .expect("rebuild");
        assert_eq!(report.copied.len(), 1);
        assert_eq!(report.copied[0].relative_path, "lxc/list.md");
        assert_eq!(report.diffs.len(), 1);
        assert!(report.diffs[0].contains("staged/lxc/list.md"));
        assert!(report.diffs[0].contains("+List instances with more detail."));
    }

    #[test]
    fn missing_generator_config_is_fatal() {
        let temp = tempdir().expect("tempdir");
        let paths = resolved(temp.path());
        let error = build_manpages(&paths, &BuildConfig::default(), &ManpageOptions::default())
            .expect_err("must fail");
        assert!(error.to_string().contains("manpages.generator"));
    }

    #[test]
    fn missing_generator_binary_is_fatal() {
        let temp = tempdir().expect("tempdir");
        let paths = resolved(temp.path());
        let mut config = BuildConfig::default();
        config.manpages.generator = Some("/nonexistent/manpage-generator".to_string());
        let error = build_manpages(&paths, &config, &ManpageOptions::default())
            .expect_err("must fail");
        assert!(error.to_string().contains("failed to run man-page generator"));
    }

    #[test]
    fn skip_generate_requires_populated_staging() {
        let temp = tempdir().expect("tempdir");
        let paths = resolved(temp.path());
        let error = build_manpages(
            &paths,
            &BuildConfig::default(),
            &ManpageOptions {
                skip_generate: true,
                ..ManpageOptions::default()
            },
        )
        .expect_err("must fail");
        assert!(error.to_string().contains("staging directory is missing"));
    }
}
