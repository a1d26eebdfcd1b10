//! Compute the root proof and distribution items for a directory.
//!
//! Every regular file under `--dir` becomes one file of the bundle, named by its path
//! relative to the directory (`/`-separated) and ordered by that path. Files are split
//! into `--fragment-size` chunks, the two-tier tree is built and the result is printed:
//!
//! ```json
//! {"root_proof":"...","fragment_size":4096,"files":[...],"items":[...]}
//! ```
//!
//! `root_proof` is what the owner passes to CommitRootProof; `items` are ready to be
//! submitted in DistributeBatch calls.
//!
//! # Example Usage
//!
//! ```bash
//! build_root_proof --dir ./site --fragment-size 4096 --output bundle.json
//!
//! # Root only
//! build_root_proof --dir ./site --root-only
//! ```
//!
//! Empty files are committed in the tree but produce no item: a storage ledger never
//! accepts an empty fragment.

use anyhow::{Context, Result, bail};
use clap::Parser;
use common::{BundleCommitment, DistributeItem, FileFragments};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(about = "Compute the CSU root proof and distribution items for a directory")]
struct Args {
    /// Directory holding the bundle
    #[arg(long)]
    dir: PathBuf,

    /// Fragment size in bytes; must match the session's fragment_size
    #[arg(long, default_value = "1048576")]
    fragment_size: usize,

    /// Write JSON here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print only the hex root proof
    #[arg(long)]
    root_only: bool,
}

#[derive(Serialize)]
struct FileSummary {
    path: String,
    size: u64,
    file_root: String,
    fragments: usize,
}

#[derive(Serialize)]
struct BundleOutput {
    root_proof: String,
    fragment_size: usize,
    files: Vec<FileSummary>,
    items: Vec<DistributeItem>,
}

/// Regular files under `root`, as `(relative path, absolute path)`, sorted by relative path.
///
/// Symlinks are not followed, so a link cycle cannot repeat a file under several paths.
fn collect_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("walk dir: {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} is outside {}", entry.path().display(), root.display()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, entry.into_path()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.fragment_size == 0 {
        bail!("--fragment-size must be greater than zero");
    }

    let files = collect_files(&args.dir)?;
    if files.is_empty() {
        bail!("no files under {}", args.dir.display());
    }

    let mut inputs = Vec::with_capacity(files.len());
    for (relative, path) in &files {
        let data = std::fs::read(path).with_context(|| format!("read file: {}", path.display()))?;
        inputs.push(FileFragments::chunked(relative.as_str(), &data, args.fragment_size));
    }

    let bundle = BundleCommitment::build(inputs).context("build bundle commitment")?;
    let root_proof = bundle.root_hex();
    if args.root_only {
        println!("{root_proof}");
        return Ok(());
    }

    let items: Vec<DistributeItem> = bundle
        .items()
        .into_iter()
        .filter(|item| {
            if item.data.is_empty() {
                warn!(path = %item.path, "Skipping empty file, nothing to distribute");
                return false;
            }
            true
        })
        .collect();

    let output = BundleOutput {
        root_proof,
        fragment_size: args.fragment_size,
        files: bundle
            .files()
            .iter()
            .map(|f| FileSummary {
                path: f.path.clone(),
                size: f.size,
                file_root: hex::encode(f.file_root()),
                fragments: f.fragments.len(),
            })
            .collect(),
        items,
    };
    info!(
        root_proof = %output.root_proof,
        files = output.files.len(),
        items = output.items.len(),
        "Bundle commitment built"
    );

    let json = serde_json::to_string_pretty(&output)?;
    match &args.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("write output: {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}
