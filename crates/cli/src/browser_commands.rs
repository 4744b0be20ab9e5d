//! CLI subcommands for browser discovery.

use std::process::ExitCode;

use {
    anyhow::Result,
    clap::Subcommand,
    mirage_browser::{Detection, detect_browser},
};

#[derive(Subcommand)]
pub enum BrowserAction {
    /// Find the Chromium-family browser a run would launch.
    Detect,
}

pub fn handle_browser(action: BrowserAction) -> Result<ExitCode> {
    match action {
        BrowserAction::Detect => detect(),
    }
}

fn detect() -> Result<ExitCode> {
    let config = mirage_config::discover_and_load();
    let browser = &config.browser;

    match detect_browser(browser.chrome_path.as_deref()) {
        Detection::Found { path, source } => {
            println!("{}", path.display());
            eprintln!("  found via:  {source}");
            eprintln!("  headless:   {}", browser.headless);
            eprintln!(
                "  viewport:   {}x{}",
                browser.viewport_width, browser.viewport_height
            );
            Ok(ExitCode::SUCCESS)
        },
        Detection::Missing { hint } => {
            if let Some(ref configured) = browser.chrome_path {
                eprintln!("browser.chrome_path does not exist: {configured}\n");
            }
            eprintln!("{hint}");
            Ok(ExitCode::FAILURE)
        },
    }
}
