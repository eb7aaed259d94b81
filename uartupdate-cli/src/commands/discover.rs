//! Port and baud-rate discovery, and the port list.

use anyhow::Result;
use console::style;
use std::env;
use uartupdate::{
    BaudScan, BaudScanConfig, NativeOpener, PortScanConfig, PortScanner, SerialConfig, SyncResult,
    list_ports, persist_discovery,
};

use crate::config::Config;
use crate::{Cli, CliError, MIN_BAUD, Settings};

fn result_style(result: SyncResult) -> console::StyledObject<SyncResult> {
    match result {
        SyncResult::Ok => style(result).green(),
        SyncResult::WrongData => style(result).yellow(),
        SyncResult::Timeout | SyncResult::Error => style(result).dim(),
    }
}

/// Port scan command implementation.
pub(crate) fn cmd_scan(cli: &Cli, settings: &Settings, config: &mut Config, json: bool) -> Result<()> {
    let baud = if settings.baud == 0 {
        uartupdate::DEFAULT_BAUD
    } else {
        settings.baud.max(MIN_BAUD)
    };
    let scan_config = PortScanConfig::default();

    if !cli.quiet && !json {
        eprintln!(
            "{} Probing {} at {baud} baud",
            style("🔍").cyan(),
            scan_config.families.join("*, ") + "*"
        );
    }

    let mut scanner = PortScanner::new(NativeOpener)
        .with_serial_config(SerialConfig::default().with_baud_rate(baud))
        .with_timeouts(settings.timeouts.clone());
    let found = scanner.scan(&scan_config).map_err(CliError::Scan)?;

    persist_discovery(&found, &scan_config.result_file)
        .map_err(|e| CliError::File(format!("Cannot save discovered port: {e}")))?;
    config.save_port(&found.name, &env::current_dir()?)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    } else if !cli.quiet {
        eprintln!(
            "{} Device found on {}",
            style("→").green().bold(),
            style(&found.name).cyan().bold()
        );
    }
    Ok(())
}

fn print_baud_scan(scan: &BaudScan) {
    for observation in &scan.observations {
        eprintln!(
            "  {:>7} baud  {}",
            observation.baud_rate,
            result_style(observation.result)
        );
    }
    match (scan.ok_rates().first(), scan.ok_rates().last()) {
        (Some(first), Some(last)) => eprintln!(
            "\n{} Device answers from {first} to {last} baud",
            style("✓").green().bold()
        ),
        _ => eprintln!("\n{} No rate answered sync", style("⚠").yellow()),
    }
}

/// Baud scan command implementation.
pub(crate) fn cmd_scan_baud(
    cli: &Cli,
    settings: &Settings,
    low: u32,
    high: u32,
    json: bool,
) -> Result<()> {
    let scan_config = BaudScanConfig { low, high };
    let mut link = settings.open()?;

    if !cli.quiet && !json {
        eprintln!(
            "{} Scanning {low}..{high} baud on {}",
            style("🔍").cyan(),
            style(&settings.port).cyan()
        );
    }

    let scan = link.scan_baud_rate(&scan_config).map_err(|e| match e {
        uartupdate::Error::InvalidInput(msg) => CliError::Baud(msg),
        other => CliError::Scan(other),
    })?;

    // Leave the port at a working rate
    if let Some(best) = scan.suggested_rate() {
        link.set_baud_rate(best)
            .map_err(|e| CliError::Baud(e.to_string()))?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&scan)?);
    } else if !cli.quiet {
        print_baud_scan(&scan);
        if let Some(best) = scan.suggested_rate() {
            eprintln!(
                "{} Suggested rate: {}",
                style("→").green().bold(),
                style(best).cyan().bold()
            );
        }
    }
    Ok(())
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = list_ports().map_err(CliError::Port)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
    } else {
        for port in &ports {
            let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" ({vid:04X}:{pid:04X})")
            } else {
                String::new()
            };
            let product = port
                .product
                .as_deref()
                .map(|p| format!(" - {}", style(p).dim()))
                .unwrap_or_default();

            eprintln!(
                "  {} {}{}{}",
                style("•").green(),
                style(&port.name).cyan(),
                vid_pid,
                product
            );
        }
    }
    Ok(())
}
