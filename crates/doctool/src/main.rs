use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use doctool_core::config::{
    ContentVariant, content_set, load_config, load_substitutions,
};
use doctool_core::links::{HttpTitleSource, LinkResolver};
use doctool_core::manpages::{ManpageOptions, ManpageReport, build_manpages};
use doctool_core::metadata::scan_metadata;
use doctool_core::requirements::{RequirementsOptions, write_requirements};
use doctool_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, resolve_paths,
};
use doctool_core::toc::annotate_toc;

#[derive(Debug, Parser)]
#[command(
    name = "doctool",
    version,
    about = "Documentation-site build tooling: TOC annotation, link enrichment, man-page preprocessing"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    doc_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    doc_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            doc_root: cli.doc_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Status,
    Toc(TocArgs),
    Links(LinksArgs),
    Manpages(ManpagesArgs),
    Requirements(RequirementsArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
struct TocArgs {
    #[command(subcommand)]
    command: TocSubcommand,
}

#[derive(Debug, Subcommand)]
enum TocSubcommand {
    Annotate {
        #[arg(long, value_name = "PAGE", help = "Doc-tree path of the page the fragment belongs to")]
        page: String,
        #[arg(long, value_name = "FILE", help = "HTML fragment file (stdin when omitted)")]
        input: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct LinksArgs {
    #[command(subcommand)]
    command: LinksSubcommand,
}

#[derive(Debug, Subcommand)]
enum LinksSubcommand {
    Resolve {
        #[arg(value_name = "SPEC", help = "Comma-separated [text](url) pairs or raw URLs")]
        spec: String,
    },
    Topics {
        #[arg(value_name = "IDS", help = "Comma-separated forum topic IDs")]
        ids: String,
        #[arg(long, value_name = "NAME", help = "Forum name from site.discourse_prefixes")]
        forum: String,
    },
}

#[derive(Debug, Args)]
struct ManpagesArgs {
    #[command(subcommand)]
    command: ManpagesSubcommand,
}

#[derive(Debug, Subcommand)]
enum ManpagesSubcommand {
    Build {
        #[arg(long, help = "Reuse the staging directory instead of running the generator")]
        skip_generate: bool,
        #[arg(long, help = "Print unified diffs of pages that changed")]
        diff: bool,
        #[arg(long, help = "Print the build report as JSON")]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct RequirementsArgs {
    #[arg(long, help = "Include the PDF export toolchain")]
    pdf: bool,
    #[arg(long, help = "Include the spelling-check packages")]
    spelling: bool,
    #[arg(long, value_name = "PATH", help = "Write here instead of the default location")]
    output: Option<PathBuf>,
    #[arg(long, help = "Print to stdout instead of writing a file")]
    print: bool,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
enum ConfigSubcommand {
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Toc(TocArgs { command })) => match command {
            TocSubcommand::Annotate { page, input } => run_toc_annotate(&runtime, &page, input),
        },
        Some(Commands::Links(LinksArgs { command })) => match command {
            LinksSubcommand::Resolve { spec } => run_links_resolve(&runtime, &spec),
            LinksSubcommand::Topics { ids, forum } => run_links_topics(&runtime, &ids, &forum),
        },
        Some(Commands::Manpages(ManpagesArgs { command })) => match command {
            ManpagesSubcommand::Build {
                skip_generate,
                diff,
                json,
            } => run_manpages_build(&runtime, skip_generate, diff, json),
        },
        Some(Commands::Requirements(args)) => run_requirements(&runtime, args),
        Some(Commands::Config(ConfigArgs { command })) => match command {
            ConfigSubcommand::Show => run_config_show(&runtime),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let metadata = scan_metadata(&paths.doc_root)?;

    println!("runtime status");
    println!("doc_root: {}", normalize_path(&paths.doc_root));
    println!("doc_root_exists: {}", format_flag(paths.doc_root.exists()));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("config_exists: {}", format_flag(paths.config_path.exists()));
    println!(
        "manpage_staging_dir: {}",
        normalize_path(&paths.manpage_staging_dir)
    );
    println!(
        "manpage_target_dir: {}",
        normalize_path(&paths.manpage_target_dir(config.manpages.target_dir()))
    );
    println!(
        "manpage_generator: {}",
        config.manpages.generator.as_deref().unwrap_or("<unset>")
    );
    println!("pages_with_metadata: {}", metadata.len());
    println!("toc_categories: {}", config.toc.categories.len());
    println!("redirects: {}", config.redirects.len());
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_toc_annotate(runtime: &RuntimeOptions, page: &str, input: Option<PathBuf>) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let metadata = scan_metadata(&paths.doc_root)?;

    let html = match input {
        Some(path) => fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read HTML fragment from stdin")?;
            buffer
        }
    };

    print!("{}", annotate_toc(&html, page, &metadata, &config.toc.categories));
    Ok(())
}

fn run_links_resolve(runtime: &RuntimeOptions, spec: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let mut resolver = LinkResolver::new(HttpTitleSource::new(&config.links)?);

    let html = resolver.render_links(spec);
    print_link_output(&html, resolver.failures());
    Ok(())
}

fn run_links_topics(runtime: &RuntimeOptions, ids: &str, forum: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let Some(prefix) = config.site.discourse_prefixes.get(forum) else {
        anyhow::bail!(
            "unknown forum `{forum}`; configure it under [site.discourse_prefixes] in {}",
            normalize_path(&paths.config_path)
        );
    };
    let prefix = prefix.clone();
    let mut resolver = LinkResolver::new(HttpTitleSource::new(&config.links)?);

    let html = resolver.render_topics(ids, &prefix);
    print_link_output(&html, resolver.failures());
    Ok(())
}

fn print_link_output(html: &str, failures: &[String]) {
    if html.is_empty() {
        println!("links: <none resolved>");
    } else {
        println!("{html}");
    }
    for failure in failures {
        eprintln!("warning: {failure}");
    }
}

fn run_manpages_build(
    runtime: &RuntimeOptions,
    skip_generate: bool,
    diff: bool,
    json: bool,
) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;

    let report = build_manpages(
        &paths,
        &config,
        &ManpageOptions {
            skip_generate,
            show_diff: diff,
        },
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_manpage_report(&report);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn print_manpage_report(report: &ManpageReport) {
    println!("manpages build");
    println!("generated: {}", format_flag(report.generated));
    println!("exploded_pages: {}", report.exploded_pages);
    println!("toctree_parents: {}", report.toctree_parents);
    println!("copied_files: {}", report.copied.len());
    for page in &report.copied {
        println!("copied: {} ({})", page.relative_path, page.content_hash);
    }
    println!("unchanged_files: {}", report.unchanged_files);
    for diff in &report.diffs {
        println!("\n{diff}");
    }
}

fn run_requirements(runtime: &RuntimeOptions, args: RequirementsArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let options = RequirementsOptions {
        pdf: args.pdf,
        spelling: args.spelling,
    };

    if args.print {
        print!(
            "{}",
            doctool_core::requirements::render_requirements(options, &config.requirements)
        );
        return Ok(());
    }

    let output = args.output.unwrap_or_else(|| paths.requirements_path.clone());
    let wrote = write_requirements(&output, options, &config.requirements)?;
    println!("requirements_path: {}", normalize_path(&output));
    println!("wrote: {}", format_flag(wrote));
    Ok(())
}

fn run_config_show(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let variant = ContentVariant::from_env();
    let set = content_set(&config, variant);
    let substitutions =
        load_substitutions(&paths.doc_root, &config.site.substitution_files())?;

    println!("content_set: {}", set.variant.as_str());
    println!("tag: {}", set.tag);
    println!("toc_filter_exclude: {}", set.toc_filter_exclude);
    if set.excludes.is_empty() {
        println!("excludes: <none>");
    } else {
        for exclude in &set.excludes {
            println!("exclude: {exclude}");
        }
    }
    for redirect in &set.redirects {
        println!("redirect: {} -> {}", redirect.from, redirect.to);
    }
    println!("substitution_keys: {}", substitutions.len());
    for key in substitutions.keys() {
        println!("substitution: {key}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        doc_root: runtime.doc_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.doc_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
