//! Write, read, execute and status command implementations.

use anyhow::Result;
use console::style;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use uartupdate::{Error as LinkError, Progress, TransferReport, WriteSource};

use crate::{Cli, CliError, Settings, progress_bar, was_interrupted};

/// Time the device needs to retune its UART after the high-rate request.
const HIGH_RATE_SETTLE: Duration = Duration::from_millis(100);

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled.into())
    } else {
        Ok(())
    }
}

/// Load the write payload before any transport activity.
fn load_source(file: Option<&Path>, words: Option<&str>) -> Result<WriteSource> {
    let source = match (file, words) {
        (Some(path), _) => {
            let data = fs::read(path).map_err(|e| {
                CliError::File(format!("Cannot read {}: {e}", path.display()))
            })?;
            WriteSource::Bytes(data)
        },
        (None, Some(text)) => {
            WriteSource::parse_words(text).map_err(|e| CliError::File(e.to_string()))?
        },
        (None, None) => return Err(CliError::File("Nothing to write".into()).into()),
    };

    if source.is_empty() {
        return Err(CliError::File("Write payload is empty".into()).into());
    }
    Ok(source)
}

/// Console dump: each 4-byte group as a little-endian word, four per line.
fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (i, word) in data.chunks(4).enumerate() {
        out.push_str("0x");
        for byte in word.iter().rev() {
            let _ = write!(out, "{byte:02X}");
        }
        out.push(if i % 4 == 3 { '\n' } else { ' ' });
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.pop();
        out.push('\n');
    }
    out
}

/// Run `read` into a buffer and dump whatever arrived, even when a later
/// window failed.
fn dump_windows<F>(out: &mut dyn Write, read: F) -> uartupdate::Result<TransferReport>
where
    F: FnOnce(&mut Vec<u8>) -> uartupdate::Result<TransferReport>,
{
    let mut buffer = Vec::new();
    let result = read(&mut buffer);
    out.write_all(hex_dump(&buffer).as_bytes())
        .and_then(|()| out.flush())
        .map_err(LinkError::Output)?;
    result
}

/// Write command implementation.
pub(crate) fn cmd_write(
    cli: &Cli,
    settings: &Settings,
    address: u32,
    file: Option<&Path>,
    words: Option<&str>,
) -> Result<()> {
    let source = load_source(file, words)?;
    if !cli.quiet {
        eprintln!(
            "{} Writing {} bytes to 0x{address:08X}",
            style("📦").cyan(),
            source.byte_len()
        );
    }

    let mut link = settings.connect(cli.quiet)?;
    let pb = progress_bar(cli, source.byte_len());

    let report = link
        .write_memory(address, &source, |p| pb.set_position(p.bytes as u64))
        .map_err(CliError::Command);
    pb.finish_and_clear();
    let report = report?;

    if !cli.quiet {
        eprintln!(
            "{} Wrote {} bytes in {} packets",
            style("✓").green().bold(),
            report.bytes,
            report.windows
        );
    }
    Ok(())
}

/// Read command implementation.
pub(crate) fn cmd_read(
    cli: &Cli,
    settings: &Settings,
    address: u32,
    size: usize,
    output: Option<&Path>,
) -> Result<()> {
    if size == 0 {
        return Err(CliError::Size("Read size must be at least 1 byte".into()).into());
    }

    // Create the output before touching the device
    let mut file = match output {
        Some(path) => Some(BufWriter::new(File::create(path).map_err(|e| {
            CliError::File(format!("Cannot create {}: {e}", path.display()))
        })?)),
        None => None,
    };

    let mut link = settings.connect(cli.quiet)?;
    let pb = progress_bar(cli, size);
    let progress = |p: Progress| pb.set_position(p.bytes as u64);

    let result = match file.as_mut() {
        Some(sink) => {
            let result = link.read_memory(address, size, sink, progress);
            sink.flush()
                .map_err(|e| CliError::File(format!("Cannot write output: {e}")))?;
            result
        },
        None => dump_windows(&mut io::stdout().lock(), |buffer| {
            link.read_memory(address, size, buffer, progress)
        }),
    };
    pb.finish_and_clear();
    let report = result.map_err(CliError::Command)?;

    if !cli.quiet {
        eprintln!(
            "{} Read {} bytes from 0x{address:08X}",
            style("✓").green().bold(),
            report.bytes
        );
    }
    Ok(())
}

/// Go command implementation.
pub(crate) fn cmd_go(cli: &Cli, settings: &Settings, address: u32) -> Result<()> {
    let mut link = settings.connect(cli.quiet)?;
    link.execute_exit(address).map_err(CliError::Command)?;

    if !cli.quiet {
        eprintln!(
            "{} Jumped to 0x{address:08X}",
            style("🚀").green()
        );
    }
    Ok(())
}

/// Call command implementation.
pub(crate) fn cmd_call(cli: &Cli, settings: &Settings, address: u32) -> Result<()> {
    let mut link = settings.connect(cli.quiet)?;
    if !cli.quiet {
        eprintln!("{} Calling 0x{address:08X}", style("⏳").yellow());
    }
    let code = link.execute_return(address).map_err(CliError::Command)?;

    println!("0x{code:02X}");
    Ok(())
}

/// Set-high-baud command implementation.
pub(crate) fn cmd_set_high_baud(cli: &Cli, settings: &Settings, rate: u32) -> Result<()> {
    if rate < crate::MIN_BAUD {
        return Err(CliError::Baud(format!("{rate} is below {} baud", crate::MIN_BAUD)).into());
    }

    let mut link = settings.connect(cli.quiet)?;
    link.switch_to_high_baud_rate(rate, HIGH_RATE_SETTLE)
        .map_err(|e| match e {
            LinkError::SyncFailed(_) => CliError::Sync(e),
            LinkError::Interrupted => CliError::Cancelled,
            other => CliError::Baud(other.to_string()),
        })?;

    if !cli.quiet {
        eprintln!(
            "{} Device now at {} baud",
            style("✓").green().bold(),
            style(rate).cyan()
        );
    }
    Ok(())
}

/// Status command implementation.
pub(crate) fn cmd_status(cli: &Cli, settings: &Settings, output: &Path) -> Result<()> {
    let file = File::create(output)
        .map_err(|e| CliError::File(format!("Cannot create {}: {e}", output.display())))?;
    let mut sink = BufWriter::new(file);

    let mut link = settings.connect(cli.quiet)?;
    ensure_not_interrupted()?;
    if !cli.quiet {
        eprintln!(
            "{} Waiting for status messages (Ctrl-C to stop)",
            style("📡").cyan()
        );
    }

    let records = link
        .read_status_messages(&mut sink)
        .map_err(CliError::Command)?;

    if !cli.quiet {
        eprintln!(
            "{} {records} status records saved to {}",
            style("✓").green().bold(),
            style(output.display()).yellow()
        );
    }
    Ok(())
}
