//! `mirage generate`: one prompt in, image paths out.

use std::{io::Read, path::PathBuf, process::ExitCode, time::Duration};

use {
    anyhow::{Context, Result, bail},
    clap::Args,
    mirage_browser::{BrowserConfig, CdpLauncher},
    mirage_generation::{FailureReason, GenerationController, GenerationOutcome, GenerationStatus},
    mirage_media::ImageArtifact,
    tracing::info,
};

use crate::{config_commands, session_commands};

#[derive(Args)]
pub struct GenerateArgs {
    /// Prompt text. Read from stdin when omitted.
    prompt: Option<String>,

    /// Directory for downloaded images (overrides download.output_dir).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Deadline for the whole run in seconds, downloads included (max one day).
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=86_400))]
    timeout: Option<u64>,

    /// Show the browser window.
    #[arg(long, default_value_t = false)]
    headed: bool,

    /// Print the outcome as JSON on stdout.
    #[arg(long, default_value_t = false)]
    json: bool,
}

pub async fn handle_generate(args: GenerateArgs) -> Result<ExitCode> {
    let mut config = mirage_config::discover_and_load();
    if args.headed {
        config.browser.headless = false;
    }
    config_commands::ensure_valid(&config)?;

    let prompt = match args.prompt {
        Some(p) => p,
        None => read_prompt(std::io::stdin().lock())?,
    };

    let launcher = CdpLauncher::new(BrowserConfig::from(&config.browser));
    let mut controller =
        GenerationController::new(launcher, session_commands::session_store(&config), &config)?;
    if let Some(dir) = args.output_dir {
        controller = controller.with_output_dir(dir);
    }
    if let Some(secs) = args.timeout {
        controller = controller.with_run_timeout(Duration::from_secs(secs));
    }

    let outcome = controller.generate(&prompt).await?;
    info!(request_id = %outcome.request_id, status = %outcome.status, "generation finished");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        report(&outcome);
    }
    Ok(ExitCode::from(exit_code(&outcome)))
}

fn read_prompt(mut input: impl Read) -> Result<String> {
    let mut prompt = String::new();
    input
        .read_to_string(&mut prompt)
        .context("failed to read prompt from stdin")?;
    let prompt = prompt.trim();
    if prompt.is_empty() {
        bail!("no prompt given; pass it as an argument or on stdin");
    }
    Ok(prompt.to_string())
}

/// Paths of stored images on stdout, everything else on stderr.
fn report(outcome: &GenerationOutcome) {
    for artifact in outcome.verified() {
        if let Some(ref path) = artifact.local_path {
            println!("{}", path.display());
        }
    }

    let failed: Vec<&ImageArtifact> = outcome.unverified().collect();
    if outcome.is_success() {
        if !failed.is_empty() {
            eprintln!(
                "{} of {} images downloaded; failed:",
                outcome.artifacts.len() - failed.len(),
                outcome.artifacts.len()
            );
            print_failures(&failed);
        }
        return;
    }

    eprintln!("Generation {}", outcome.status);
    print_failures(&failed);
    if matches!(
        outcome.status,
        GenerationStatus::Failed(FailureReason::AuthExpired)
    ) {
        eprintln!("Export fresh cookies and run `mirage session import <FILE>`.");
    }
}

fn print_failures(failed: &[&ImageArtifact]) {
    for artifact in failed {
        eprintln!(
            "  {}: {}",
            artifact.source,
            artifact.failure.as_deref().unwrap_or("not downloaded")
        );
    }
}

/// Process exit status for an outcome. Zero only when at least one image
/// was stored.
fn exit_code(outcome: &GenerationOutcome) -> u8 {
    if outcome.is_success() {
        return 0;
    }
    match &outcome.status {
        GenerationStatus::Failed(FailureReason::AuthExpired) => 3,
        GenerationStatus::Failed(FailureReason::ContentPolicyViolation) => 4,
        GenerationStatus::Failed(FailureReason::RateLimited) => 5,
        GenerationStatus::TimedOut => 6,
        GenerationStatus::Failed(FailureReason::ParseError(_)) => 7,
        GenerationStatus::Failed(FailureReason::DownloadFailed) => 8,
        GenerationStatus::Failed(FailureReason::Browser(_)) | GenerationStatus::Succeeded => 1,
    }
}
