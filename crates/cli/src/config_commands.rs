use std::process::ExitCode;

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    mirage_config::{Diagnostic, MirageConfig, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the config file path in use, or the default location.
    Path,
    /// Validate the configuration and report errors and warnings.
    Validate,
}

pub fn handle_config(action: ConfigAction) -> Result<ExitCode> {
    match action {
        ConfigAction::Show => show(),
        ConfigAction::Path => {
            println!("{}", mirage_config::find_or_default_config_path().display());
            Ok(ExitCode::SUCCESS)
        },
        ConfigAction::Validate => validate(),
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn show() -> Result<ExitCode> {
    let config = mirage_config::discover_and_load();
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(ExitCode::SUCCESS)
}

fn validate() -> Result<ExitCode> {
    match mirage_config::find_config_file() {
        Some(path) => eprintln!("Checking {}\n", path.display()),
        None => eprintln!("No config file found; checking defaults.\n"),
    }

    let config = mirage_config::discover_and_load();
    let diagnostics = config.validate();
    for d in &diagnostics {
        print_diagnostic(d);
    }

    let errors = count(&diagnostics, Severity::Error);
    let warnings = count(&diagnostics, Severity::Warning);
    if !diagnostics.is_empty() {
        eprintln!();
    }
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    Ok(if errors > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Refuse to start a run on a configuration with errors. Warnings are printed.
pub fn ensure_valid(config: &MirageConfig) -> Result<()> {
    let diagnostics = config.validate();
    for d in diagnostics.iter().filter(|d| d.severity == Severity::Warning) {
        print_diagnostic(d);
    }
    let errors: Vec<String> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| format!("{}: {}", d.path, d.message))
        .collect();
    if !errors.is_empty() {
        bail!("invalid configuration:\n  {}", errors.join("\n  "));
    }
    Ok(())
}

fn print_diagnostic(d: &Diagnostic) {
    let color = match d.severity {
        Severity::Error => RED,
        Severity::Warning => YELLOW,
    };
    eprintln!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message);
}

fn count(diagnostics: &[Diagnostic], severity: Severity) -> usize {
    diagnostics.iter().filter(|d| d.severity == severity).count()
}
