use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use console::style;
use subtree_dedup::cache;
use subtree_dedup::logging::init_logging;
use subtree_dedup::scanner::ScanConfig;
use subtree_dedup::utils::{format_file_size, parse_root_spec, IgnoreList};
use subtree_dedup::{resolve, DeletionPlan, ResolveReport, Scan, Scanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Shell script of removal commands
    Script,
    /// The same plan as JSON
    Json,
}

#[derive(Parser)]
#[command(
    name = "dedup",
    version,
    about = "Find duplicate files and directory trees and print a script that removes them",
    long_about = "Scan one or more roots, match files and whole directories by content, keep the shallowest copy of each and print a shell script that removes the rest. Nothing is deleted by this program."
)]
struct Cli {
    /// Roots to scan, as PATH or WEIGHT:PATH
    #[arg(
        value_name = "ROOT",
        required_unless_present = "clean_database",
        help = "Files or directories to scan; prefix with WEIGHT: to bias a root deeper (positive) or shallower (negative)"
    )]
    roots: Vec<String>,

    /// Persistent hash cache
    #[arg(
        short = 'd',
        long,
        value_name = "PATH",
        help = "Hash cache location; unchanged files are not re-read"
    )]
    database: Option<PathBuf>,

    /// Drop cache entries for paths that no longer exist, then exit
    #[arg(
        short = 'c',
        long,
        requires = "database",
        help = "Remove dead entries from the hash cache and exit"
    )]
    clean_database: bool,

    /// Layer roots in depth so earlier roots are preferred
    #[arg(
        short = 's',
        long,
        help = "Offset each root past the depth used by the roots before it"
    )]
    stagger_paths: bool,

    /// Extra names to treat as junk
    #[arg(
        long = "ignore-name",
        value_name = "NAME",
        help = "Treat files with this name as junk (repeatable)"
    )]
    ignore_names: Vec<String>,

    /// Output format
    #[arg(
        long,
        value_enum,
        default_value = "script",
        help = "Output format for the removal plan"
    )]
    format: OutputFormat,

    /// Verbose output
    #[arg(
        short,
        long,
        help = "Narrate progress as comment lines"
    )]
    verbose: bool,

    /// Number of threads to use for hashing
    #[arg(
        long,
        default_value = "0",
        help = "Number of hashing threads (0 = auto-detect)"
    )]
    threads: usize,
}

/// Writes diagnostics where they cannot break the plan: `#` comments in a
/// script, stderr next to JSON.
struct Narrator<W: Write> {
    out: W,
    comments_on_stdout: bool,
}

impl<W: Write> Narrator<W> {
    fn note(&mut self, message: &str) -> io::Result<()> {
        if self.comments_on_stdout {
            writeln!(self.out, "# {}", message)
        } else {
            eprintln!("{}", style(message).dim());
            Ok(())
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{} {:#}", style("Error:").red().bold(), err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose);

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .context("Failed to configure the hashing thread pool")?;
    }

    let stdout = io::stdout();
    let mut narrator = Narrator {
        out: stdout.lock(),
        comments_on_stdout: args.format == OutputFormat::Script,
    };

    if args.clean_database {
        let database = args
            .database
            .as_deref()
            .context("--clean-database requires --database")?;
        let removed = cache::clean(database)?;
        narrator.note(&format!(
            "removed {} dead entries from {}",
            removed,
            database.display()
        ))?;
        return Ok(());
    }

    let roots = args
        .roots
        .iter()
        .map(|arg| parse_root_spec(arg))
        .collect::<Result<Vec<_>, _>>()?;

    let mut ignore = IgnoreList::default();
    for name in &args.ignore_names {
        ignore.add(name);
    }

    let scanner = Scanner::with_config(ScanConfig {
        stagger: args.stagger_paths,
        ignore,
        cache: args.database.clone(),
        verbose: args.verbose,
    });

    if narrator.comments_on_stdout {
        writeln!(narrator.out, "#!/bin/sh")?;
    }

    let mut scan = scanner.scan(&roots)?;
    for warning in &scan.warnings {
        narrator.note(&warning.message)?;
    }
    if args.verbose {
        narrate_scan(&mut narrator, &scan)?;
    }

    let report = resolve(&mut scan.forest)?;
    if args.verbose {
        narrate_passes(&mut narrator, &report)?;
    }

    let plan = DeletionPlan::from_forest(&scan.forest);
    match args.format {
        OutputFormat::Script => {
            if plan.is_empty() {
                narrator.note("no duplicates found")?;
            } else {
                plan.write_script(&mut narrator.out)?;
            }
        }
        OutputFormat::Json => {
            writeln!(narrator.out, "{}", plan.to_json()?)?;
            narrator.note(&format!(
                "{} removals, {} reclaimable",
                plan.removal_count(),
                format_file_size(plan.reclaimable_bytes())
            ))?;
        }
    }

    narrator.out.flush()?;
    Ok(())
}

fn narrate_scan<W: Write>(narrator: &mut Narrator<W>, scan: &Scan) -> io::Result<()> {
    for root in scan.forest.roots() {
        let node = scan.forest.node(root.id);
        narrator.note(&format!(
            "root {} at depth {}{}",
            root.label,
            node.depth(),
            if node.is_dir() { "" } else { " (file)" }
        ))?;
    }
    narrator.note(&format!(
        "scanned {} files in {} directories",
        scan.files, scan.directories
    ))
}

fn narrate_passes<W: Write>(narrator: &mut Narrator<W>, report: &ResolveReport) -> io::Result<()> {
    for pass in &report.passes {
        narrator.note(&format!(
            "pass {}: {} duplicate directories in {} groups, {} duplicate files in {} groups, {} empty directories",
            pass.pass,
            pass.directory_losers,
            pass.directory_groups,
            pass.file_losers,
            pass.file_groups,
            pass.pruned
        ))?;
    }
    Ok(())
}
