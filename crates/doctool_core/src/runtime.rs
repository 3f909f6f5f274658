use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const STATE_DIR_NAME: &str = ".doctool";
pub const MANPAGE_STAGING_DIR_NAME: &str = "manpages";
pub const REQUIREMENTS_FILENAME: &str = "requirements.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub doc_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub doc_root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub manpage_staging_dir: PathBuf,
    pub requirements_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    /// Published man-page location inside the doc tree. The configured value
    /// is interpreted relative to the doc root.
    pub fn manpage_target_dir(&self, configured: &str) -> PathBuf {
        let candidate = Path::new(configured);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.doc_root.join(candidate)
        }
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "doc_root={} ({})\nstate_dir={}\nconfig_path={} ({})\nmanpage_staging_dir={}\nrequirements_path={}",
            normalize_for_display(&self.doc_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.manpage_staging_dir),
            normalize_for_display(&self.requirements_path),
        )
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

pub fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (doc_root, root_source) = resolve_doc_root(context, overrides, &lookup_env);

    let state_dir = doc_root.join(STATE_DIR_NAME);
    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &doc_root), ValueSource::Flag)
    } else if let Some(value) = lookup_env("DOCTOOL_CONFIG") {
        (
            absolutize(Path::new(value.trim()), &doc_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join("config.toml"), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        manpage_staging_dir: state_dir.join(MANPAGE_STAGING_DIR_NAME),
        requirements_path: state_dir.join(REQUIREMENTS_FILENAME),
        doc_root,
        state_dir,
        config_path,
        root_source,
        config_source,
    })
}

fn resolve_doc_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.doc_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = lookup_env("DOCTOOL_DOC_ROOT") {
        return (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        );
    }

    let root = detect_doc_root_heuristic(&context.cwd, context.executable_dir.as_deref());
    (root, ValueSource::Heuristic)
}

fn detect_doc_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> PathBuf {
    let mut seen = HashSet::new();
    for candidate in candidate_roots(cwd, executable_dir) {
        let key = normalize_for_display(&candidate);
        if !seen.insert(key) {
            continue;
        }
        if candidate.join("substitutions.yaml").exists()
            || candidate.join(STATE_DIR_NAME).exists()
        {
            return candidate;
        }
    }
    cwd.to_path_buf()
}

fn candidate_roots(cwd: &Path, executable_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut out = ancestors(cwd);
    if let Some(exe_dir) = executable_dir {
        out.extend(ancestors(exe_dir));
    }
    out
}

fn ancestors(path: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut cursor = Some(path);
    while let Some(current) = cursor {
        out.push(current.to_path_buf());
        cursor = current.parent();
    }
    out
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
