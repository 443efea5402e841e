//! kasane - inspect and edit a union filesystem from the shell
//!
//! ## Usage
//!
//! ```bash
//! # Stack two directories, mods first
//! kasane --layer ./mods --layer ./base:r ls
//!
//! # Use a manifest
//! kasane --manifest game.ron tree --depth 3
//! kasane --manifest game.ron cat config/video.ini
//! echo "fullscreen=1" | kasane --manifest game.ron write config/video.ini
//! ```
//!
//! Logging goes to stderr, filtered by `RUST_LOG` (default `warn`).

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use kasane_kernel::{BackendSpec, Entry, FileSystem, UnionEntry, UnionFileSystem, UnionManifest};
use kasane_types::{EntryType, OpenMode, path};

/// Union filesystem inspector.
#[derive(Parser, Debug)]
#[command(name = "kasane")]
#[command(about = "Inspect and edit a union of filesystems")]
struct Args {
    /// RON manifest describing the union
    #[arg(short, long, conflicts_with = "layer")]
    manifest: Option<PathBuf>,

    /// Directory layer as DIR[:OPS], highest priority first (repeatable)
    #[arg(short, long, value_name = "DIR[:OPS]")]
    layer: Vec<BackendSpec>,

    /// Fold names to lowercase for lookups
    #[arg(short = 'i', long)]
    case_insensitive: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "")]
        path: String,
        /// Show type and providing layer
        #[arg(short, long)]
        long: bool,
    },
    /// Print a directory tree
    Tree {
        #[arg(default_value = "")]
        path: String,
        #[arg(short, long, default_value_t = 2)]
        depth: usize,
    },
    /// Print a file to stdout
    Cat { path: String },
    /// Replace a file's contents with stdin, creating it if needed
    Write { path: String },
    /// Create a directory (and missing parents)
    Mkdir { path: String },
    /// Create an empty file if nothing exists at the path
    Touch { path: String },
    /// Remove an entry from every deletable layer
    Rm { path: String },
    /// Move an entry within its layer
    Mv { from: String, to: String },
    /// Show the union's layers and capabilities
    Caps,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("kasane: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let union = open_union(&args)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    execute(&union, args.command, &mut io::stdin().lock(), &mut out)?;
    out.flush()?;
    Ok(())
}

fn open_union(args: &Args) -> Result<UnionFileSystem> {
    let mut manifest = match &args.manifest {
        Some(file) => UnionManifest::load(file)
            .with_context(|| format!("loading manifest {}", file.display()))?,
        None if args.layer.is_empty() => bail!("give --manifest or at least one --layer"),
        None => UnionManifest::new(args.layer.clone()),
    };
    if args.case_insensitive {
        manifest.case_insensitive = true;
    }
    let union = manifest.build().context("building union")?;
    tracing::debug!(backends = ?union.backend_names(), "union ready");
    Ok(union)
}

fn execute(
    union: &UnionFileSystem,
    command: Command,
    input: &mut dyn Read,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        Command::Ls { path, long } => cmd_ls(union, &path, long, out),
        Command::Tree { path, depth } => {
            let dir = existing(union, &path)?;
            writeln!(out, "{}", display_path(dir.path()))?;
            print_tree(dir.as_ref(), depth, "", out)
        }
        Command::Cat { path } => {
            let entry = existing(union, &path)?;
            out.write_all(&entry.read_to_end()?)?;
            Ok(())
        }
        Command::Write { path } => cmd_write(union, &path, input),
        Command::Mkdir { path } => {
            union.root().create_entry(EntryType::Directory, &path)?;
            Ok(())
        }
        Command::Touch { path } => {
            union.root().create_entry(EntryType::File, &path)?;
            Ok(())
        }
        Command::Rm { path } => {
            if !union.root().delete_child(&path)? {
                bail!("{path}: nothing was removed");
            }
            Ok(())
        }
        Command::Mv { from, to } => {
            existing(union, &from)?.rename(&to)?;
            Ok(())
        }
        Command::Caps => {
            writeln!(out, "union: {}", union.supported_operations().short())?;
            for (index, name) in union.backend_names().iter().enumerate() {
                writeln!(out, "{index}: {name}")?;
            }
            Ok(())
        }
    }
}

fn existing(union: &UnionFileSystem, path: &str) -> Result<Arc<UnionEntry>> {
    union
        .entry(path)?
        .with_context(|| format!("{path}: no such file or directory"))
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "/" } else { path }
}

fn type_marker(kind: EntryType) -> char {
    match kind {
        EntryType::Directory => 'd',
        EntryType::File => '-',
        EntryType::Unknown => '?',
    }
}

fn cmd_ls(union: &UnionFileSystem, path: &str, long: bool, out: &mut dyn Write) -> Result<()> {
    let dir = existing(union, path)?;
    if dir.entry_type().is_file() {
        writeln!(out, "{}", dir.path())?;
        return Ok(());
    }
    let names = union.backend_names();
    for child in dir.list_children()? {
        let name = path::file_name(child.path());
        if !long {
            writeln!(out, "{name}")?;
            continue;
        }
        // Provenance needs the concrete union entry.
        let layer = union
            .entry(child.path())?
            .and_then(|e| e.backend_index())
            .and_then(|i| names.get(i).cloned())
            .unwrap_or_default();
        writeln!(out, "{} {name:<32} {layer}", type_marker(child.entry_type()))?;
    }
    Ok(())
}

fn print_tree(dir: &dyn Entry, depth: usize, indent: &str, out: &mut dyn Write) -> Result<()> {
    if depth == 0 || !dir.entry_type().is_dir() {
        return Ok(());
    }
    let children = dir.list_children()?;
    let last = children.len().saturating_sub(1);
    for (i, child) in children.iter().enumerate() {
        let (branch, next) = if i == last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        let suffix = if child.entry_type().is_dir() { "/" } else { "" };
        writeln!(out, "{indent}{branch}{}{suffix}", path::file_name(child.path()))?;
        print_tree(child.as_ref(), depth - 1, &format!("{indent}{next}"), out)?;
    }
    Ok(())
}

fn cmd_write(union: &UnionFileSystem, path: &str, input: &mut dyn Read) -> Result<()> {
    let entry: Arc<dyn Entry> = match union.entry(path)? {
        Some(entry) => entry as Arc<dyn Entry>,
        None => union.root().create_entry(EntryType::File, path)?,
    };
    let mut stream = entry.open(OpenMode::WRITE)?;
    let copied = io::copy(input, &mut stream)?;
    stream.flush()?;
    tracing::debug!(path, bytes = copied, "wrote file");
    Ok(())
}
