use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::RequirementsSection;

const HEADER: &str = "# Generated by doctool; edit the build config instead.";

/// Packages every site build needs.
const BASE_PACKAGES: &[&str] = &[
    "canonical-sphinx-extensions",
    "furo",
    "gitpython",
    "linkify-it-py",
    "myst-parser",
    "sphinx",
    "sphinx-autobuild",
    "sphinx-copybutton",
    "sphinx-design",
    "sphinx-notfound-page",
    "sphinx-remove-toctrees",
    "sphinx-reredirects",
    "sphinx-tabs",
    "sphinxcontrib-jquery",
    "sphinxext-opengraph",
    "watchfiles",
];

const PDF_PACKAGES: &[&str] = &["sphinxcontrib-svg2pdfconverter[CairoSVG]"];

const SPELLING_PACKAGES: &[&str] = &["pyspelling"];

#[derive(Debug, Clone, Copy, Default)]
pub struct RequirementsOptions {
    pub pdf: bool,
    pub spelling: bool,
}

/// Render the requirements file content: header line, then the selected
/// packages sorted and deduplicated.
pub fn render_requirements(
    options: RequirementsOptions,
    section: &RequirementsSection,
) -> String {
    let mut packages: BTreeSet<String> = BASE_PACKAGES
        .iter()
        .map(ToString::to_string)
        .collect();
    if options.pdf {
        packages.extend(PDF_PACKAGES.iter().map(ToString::to_string));
    }
    if options.spelling {
        packages.extend(SPELLING_PACKAGES.iter().map(ToString::to_string));
    }
    packages.extend(
        section
            .extras
            .iter()
            .map(|extra| extra.trim().to_string())
            .filter(|extra| !extra.is_empty()),
    );

    let mut output = String::from(HEADER);
    output.push('\n');
    for package in packages {
        output.push_str(&package);
        output.push('\n');
    }
    output
}

/// Write the rendered requirements, but only when the content differs from
/// what is already on disk. Returns whether a write occurred.
pub fn write_requirements(
    path: &Path,
    options: RequirementsOptions,
    section: &RequirementsSection,
) -> Result<bool> {
    let rendered = render_requirements(options, section);
    if path.exists() {
        let existing = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if existing == rendered {
            return Ok(false);
        }
    }
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}
