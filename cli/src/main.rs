use std::{
    env,
    ffi::{OsStr, OsString},
    fs,
    path::PathBuf,
    process,
};

use anyhow::{bail, Context};
use clap::{ArgAction, Parser};
use console::style;
use serde::Serialize;
use tlr_core::{
    find_text_location, CharacterLocation, DocumentStats, LineBasedLocation, LineBasedLocator,
    LocateOptions, TextLocation,
};

/// Text location resolver CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "tlr",
    about = "Resolve quoted snippets to exact character spans in a document."
)]
struct Args {
    /// Document to search.
    #[arg(value_name = "DOCUMENT")]
    document: PathBuf,

    /// Snippet to locate by content.
    #[arg(long, value_name = "TEXT")]
    search: Option<String>,

    /// 1-based start line for line-anchored resolution.
    #[arg(
        long,
        value_name = "N",
        conflicts_with = "search",
        requires = "start_chars",
        requires = "end_chars"
    )]
    line: Option<usize>,

    /// 1-based end line (defaults to --line).
    #[arg(long, value_name = "N", requires = "line")]
    end_line: Option<usize>,

    /// First characters of the match on the start line.
    #[arg(long, value_name = "TEXT")]
    start_chars: Option<String>,

    /// Last characters of the match on the end line.
    #[arg(long, value_name = "TEXT")]
    end_chars: Option<String>,

    /// Enable quote/dash/space normalization fallbacks.
    #[arg(long, action = ArgAction::SetTrue)]
    normalize_quotes: bool,

    /// Enable the prefix fallback for long snippets.
    #[arg(long, action = ArgAction::SetTrue)]
    partial: bool,

    /// Context hint for picking between repeated snippets.
    #[arg(long, value_name = "TEXT")]
    context: Option<String>,

    /// Skip the approximate matcher; deterministic strategies only.
    #[arg(long, action = ArgAction::SetTrue)]
    no_fuzzy: bool,

    /// Emit JSON output for automation.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Parser)]
#[command(
    name = "tlr lines",
    about = "Print a document with line numbers for prompt building."
)]
struct LinesArgs {
    /// Document to render.
    #[arg(value_name = "DOCUMENT")]
    document: PathBuf,

    /// Append document statistics after the listing.
    #[arg(long, action = ArgAction::SetTrue)]
    stats: bool,

    /// Emit JSON output for automation.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct LinesOutput {
    lines: Vec<String>,
    stats: DocumentStats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let argv: Vec<OsString> = env::args_os().collect();
    if argv.len() > 1 && argv[1].as_os_str() == OsStr::new("lines") {
        let mut forwarded = Vec::with_capacity(argv.len() - 1);
        forwarded.push(argv[0].clone());
        forwarded.extend_from_slice(&argv[2..]);
        let lines_args = LinesArgs::parse_from(forwarded);
        return run_lines(lines_args);
    }

    let args = Args::parse();
    run_locate(args)
}

fn run_locate(args: Args) -> anyhow::Result<()> {
    let content = fs::read_to_string(&args.document)
        .with_context(|| format!("Failed to read {}", args.document.display()))?;

    if let Some(search) = &args.search {
        let options = LocateOptions {
            normalize_quotes: args.normalize_quotes,
            partial_match: args.partial,
            context: args.context.clone(),
            disable_fuzzy: args.no_fuzzy,
        };
        let location = find_text_location(search, &content, &options);
        if args.json {
            println!("{}", serde_json::to_string_pretty(&location)?);
        } else {
            match &location {
                Some(found) => print_text_location(found),
                None => println!("{}", style("No location found.").yellow()),
            }
        }
        if location.is_none() {
            process::exit(1);
        }
        return Ok(());
    }

    let Some(line) = args.line else {
        bail!("provide --search, or --line with --start-chars and --end-chars");
    };
    if line == 0 {
        bail!("--line is 1-based");
    }
    let start_chars = args.start_chars.clone().unwrap_or_default();
    let end_chars = args.end_chars.clone().unwrap_or_default();
    let location = LineBasedLocation {
        start_line_index: line - 1,
        end_line_index: args.end_line.unwrap_or(line) - 1,
        start_characters: start_chars,
        end_characters: end_chars,
    };

    let locator = LineBasedLocator::new(&content);
    let resolved = locator.line_location_to_offset(&location);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        match &resolved {
            Some(found) => print_character_location(found),
            None => println!("{}", style("No location found.").yellow()),
        }
    }
    if resolved.is_none() {
        process::exit(1);
    }
    Ok(())
}

fn run_lines(args: LinesArgs) -> anyhow::Result<()> {
    let content = fs::read_to_string(&args.document)
        .with_context(|| format!("Failed to read {}", args.document.display()))?;
    let locator = LineBasedLocator::new(&content);

    if args.json {
        let output = LinesOutput {
            lines: locator.lines().to_vec(),
            stats: locator.stats(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", locator.numbered_lines());
    if args.stats {
        let stats = locator.stats();
        println!(
            "\n{} {} lines, {} characters, average line {:.1}, longest line {}",
            style("Stats:").bold(),
            stats.total_lines,
            stats.total_characters,
            stats.average_line_length,
            stats.longest_line
        );
    }
    Ok(())
}

fn print_text_location(location: &TextLocation) {
    println!(
        "{} {} (confidence {:.2})",
        style("Located via").bold(),
        style(location.strategy).cyan(),
        location.confidence
    );
    println!(
        "  span {}..{}, line {}",
        location.start_offset, location.end_offset, location.line_number
    );
    println!("  {}", style(&location.quoted_text).green());
}

fn print_character_location(location: &CharacterLocation) {
    println!("{}", style("Located from line anchors").bold());
    println!("  span {}..{}", location.start_offset, location.end_offset);
    if let Some(prefix) = &location.prefix {
        println!("  ...{}", style(prefix).dim());
    }
    println!("  {}", style(&location.quoted_text).green());
}
