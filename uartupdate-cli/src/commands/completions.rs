//! Shell completion generation and installation.

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{Shell, generate};
use console::style;
use directories::BaseDirs;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::Cli;

/// Render the completion script for `shell` into `out`.
fn render(shell: Shell, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, out);
}

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    render(shell, &mut io::stdout());
}

/// Map a shell binary path (e.g. `$SHELL`) to a supported shell.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let shell_name = Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    match shell_name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }
    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }
    None
}

/// Where the script for `shell` goes, plus a hint for activating it.
fn install_target(shell: Shell, dirs: &BaseDirs) -> Result<(PathBuf, String)> {
    let home = dirs.home_dir();
    let target = match shell {
        Shell::Bash => (
            dirs.data_dir()
                .join("bash-completion")
                .join("completions")
                .join("uartupdate"),
            "Loaded automatically by new bash sessions.".to_string(),
        ),
        Shell::Zsh => (
            home.join(".zfunc").join("_uartupdate"),
            "Add `fpath=(~/.zfunc $fpath)` before `compinit` in ~/.zshrc.".to_string(),
        ),
        Shell::Fish => (
            dirs.config_dir()
                .join("fish")
                .join("completions")
                .join("uartupdate.fish"),
            "Loaded automatically by new fish sessions.".to_string(),
        ),
        Shell::Elvish => (
            dirs.config_dir()
                .join("elvish")
                .join("lib")
                .join("uartupdate.elv"),
            "Add `use uartupdate` to your rc.elv.".to_string(),
        ),
        Shell::PowerShell => {
            let path = home
                .join(".config")
                .join("powershell")
                .join("completions")
                .join("uartupdate.ps1");
            let hint = format!("Add `. {}` to your $PROFILE.", path.display());
            (path, hint)
        },
        _ => anyhow::bail!("Unsupported shell for auto-install"),
    };
    Ok(target)
}

/// Install shell completions automatically.
pub(crate) fn cmd_completions_install(shell_arg: Option<Shell>) -> Result<()> {
    let shell = match shell_arg {
        Some(s) => s,
        None => detect_shell_type().context(
            "Could not detect your shell. Please specify it explicitly:\n  \
             uartupdate completions --install bash",
        )?,
    };
    let dirs = BaseDirs::new().context("Could not determine home directory")?;
    let (path, hint) = install_target(shell, &dirs)?;

    let mut script = Vec::new();
    render(shell, &mut script);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, &script)
        .with_context(|| format!("Failed to write completion file: {}", path.display()))?;

    eprintln!(
        "{} Installed {} completions to {}",
        style("✓").green().bold(),
        style(format!("{shell:?}")).cyan(),
        style(path.display()).yellow()
    );
    eprintln!("{hint}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_from_path() {
        assert_eq!(shell_from_path("/bin/bash"), Some(Shell::Bash));
        assert_eq!(shell_from_path("/usr/bin/zsh"), Some(Shell::Zsh));
        assert_eq!(shell_from_path("/usr/local/bin/fish"), Some(Shell::Fish));
        assert_eq!(shell_from_path("/usr/bin/pwsh"), Some(Shell::PowerShell));
        assert_eq!(shell_from_path("elvish"), Some(Shell::Elvish));
    }

    #[test]
    fn test_shell_from_path_unknown() {
        assert_eq!(shell_from_path("/usr/bin/tcsh"), None);
        assert_eq!(shell_from_path(""), None);
    }

    #[test]
    fn test_install_targets_name_the_binary() {
        let Some(dirs) = BaseDirs::new() else {
            return;
        };
        let (bash, _) = install_target(Shell::Bash, &dirs).unwrap();
        assert!(bash.to_str().unwrap().contains("bash-completion"));
        assert!(bash.ends_with("uartupdate"));

        let (zsh, hint) = install_target(Shell::Zsh, &dirs).unwrap();
        assert!(zsh.ends_with(".zfunc/_uartupdate"));
        assert!(hint.contains("fpath"));

        let (fish, _) = install_target(Shell::Fish, &dirs).unwrap();
        assert!(fish.ends_with("uartupdate.fish"));
    }

    #[test]
    fn test_completions_generate_output() {
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish] {
            let mut buf = Vec::new();
            render(shell, &mut buf);
            let output = String::from_utf8(buf).unwrap();
            assert!(output.contains("uartupdate"), "{shell:?}");
            assert!(output.contains("scan-baud"), "{shell:?}");
        }
    }
}
