//! Main entry point for the apkmux CLI application.
//!
//! The archive engine is synchronous; each command runs on a blocking thread.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::cell::RefCell;
use std::path::Path;

use apkmux::cli::{Cli, Command, default_multiplex_output};
use apkmux::io::{BufferedFile, DataSource};
use apkmux::zip::{ZipArchive, ZipSections, archives_equivalent, multiplex};

/// Application entry point.
///
/// Parses command-line arguments, sets up logging and dispatches to the
/// handler for the chosen subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    tokio::task::spawn_blocking(move || run(cli.command)).await?
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::List { file, verbose } => list_files(&file, verbose),
        Command::Multiplex {
            input,
            host_entry,
            output,
            verbose,
        } => {
            let output = output.unwrap_or_else(|| default_multiplex_output(&input));
            multiplex_archive(&input, &output, &host_entry, verbose)
        }
        Command::Compare { first, second } => compare_archives(&first, &second),
        Command::Sections { file } => show_sections(&file),
    }
}

/// List entries in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format: just entry names, one per line
/// - Verbose format (`-v`): table with size, compression ratio, method and timestamps
fn list_files(path: &Path, verbose: bool) -> Result<()> {
    let archive =
        ZipArchive::open(path).with_context(|| format!("cannot open {}", path.display()))?;

    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>6}  {:>10}  {:>5}  {:>8}  Name",
            "Length", "Size", "Cmpr", "Method", "Date", "Time", "CRC-32"
        );
        println!("{}", "-".repeat(80));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in archive.entries() {
        if !verbose {
            println!("{}", entry.name);
            continue;
        }

        let time = entry.last_modified();
        println!(
            "{:>10}  {:>10}  {}  {:>6}  {:04}-{:02}-{:02}  {:02}:{:02}  {:08x}  {}",
            entry.size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.size),
            method_name(entry.method.as_u16()),
            time.year,
            time.month,
            time.day,
            time.hour,
            time.minute,
            entry.crc32,
            entry.name
        );

        if !entry.is_directory() {
            total_uncompressed += entry.size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(80));
        println!(
            "{:>10}  {:>10}  {}  {:>41}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
        if !archive.comment().is_empty() {
            println!("comment: {}", String::from_utf8_lossy(archive.comment()));
        }
    }

    for skipped in archive.skipped_entries() {
        eprintln!(
            "warning: skipped {} at {}: {}",
            skipped.name, skipped.header_offset, skipped.reason
        );
    }

    archive.close()?;
    Ok(())
}

fn multiplex_archive(input: &Path, output: &Path, host_entry: &str, verbose: bool) -> Result<()> {
    if same_file(input, output) {
        bail!("output {} would overwrite the input", output.display());
    }

    let report = multiplex(input, output, host_entry)
        .with_context(|| format!("cannot multiplex {}", input.display()))?;

    if verbose {
        println!(
            "{} >> offset=0x{:x}",
            report.host_name, report.host_header_offset
        );
        let width = format!("{:x}", report.host_size).len().min(9);
        for entry in &report.virtual_entries {
            println!(
                "  +0x{:0width$x}  {}",
                entry.relative_offset,
                entry.name,
                width = width
            );
        }
    }

    println!(
        "Data multiplexing optimize: {} ({}) -> {} ({})  [{:.2}%]",
        file_name(input),
        format_size(report.input_len),
        file_name(output),
        format_size(report.output_len),
        report.change_percent()
    );
    println!(
        "{} entries shared, {} copied",
        report.virtual_entries.len(),
        report.copied_entries
    );
    Ok(())
}

fn compare_archives(first: &Path, second: &Path) -> Result<()> {
    let a = ZipArchive::open(first).with_context(|| format!("cannot open {}", first.display()))?;
    let b =
        ZipArchive::open(second).with_context(|| format!("cannot open {}", second.display()))?;
    let equal = archives_equivalent(&a, &b)?;
    a.close()?;
    b.close()?;

    if !equal {
        bail!(
            "{} and {} differ in content",
            first.display(),
            second.display()
        );
    }
    println!("{} and {} hold the same content", first.display(), second.display());
    Ok(())
}

fn show_sections(path: &Path) -> Result<()> {
    let file = RefCell::new(
        BufferedFile::open(path).with_context(|| format!("cannot open {}", path.display()))?,
    );
    let sections = ZipSections::locate(&mut file.borrow_mut())?;

    println!("entries            0..{}", sections.entries_size);
    if sections.has_apk_sig_block {
        println!(
            "APK signing block  {}..{} ({})",
            sections.entries_size,
            sections.central_directory_offset,
            format_size(sections.apk_sig_block_size())
        );
    }
    println!(
        "central directory  {}..{}",
        sections.central_directory_offset,
        sections.central_directory_offset + sections.central_directory_size
    );
    println!(
        "end of directory   {}..{}{}",
        sections.eocd_offset,
        sections.file_len,
        if sections.zip64 { " (zip64)" } else { "" }
    );

    let digest_input = sections.digest_input(&file)?;
    println!("digest input       {}", format_size(digest_input.size()));
    drop(digest_input);

    file.into_inner().close()?;
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn method_name(method: u16) -> String {
    match method {
        0 => "Stored".to_string(),
        8 => "Defl".to_string(),
        other => format!("#{}", other),
    }
}

/// Percentage saved by compression.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Format a byte size into a human-readable string.
///
/// Automatically selects the appropriate unit (bytes, KB, MB, GB)
/// based on the size magnitude.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// assert_eq!(format_size(1048576), "1.00 MB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
