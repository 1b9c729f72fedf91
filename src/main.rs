use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use redline::{AssistClient, RewriteMode, SettingsStore, SETTINGS_FILE_NAME};
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "redline", about = "Redline - writing assistant service console")]
struct CliArgs {
    /// Path to the settings file
    #[arg(long, default_value = SETTINGS_FILE_NAME)]
    settings: PathBuf,

    /// Enable debug mode with verbose logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ping the analysis service
    Health,
    /// Check text for issues (reads stdin when no text is given)
    Check { text: Option<String> },
    /// Rewrite text in a given mode: fix, concise, formal or friendly
    Rewrite {
        #[arg(long, default_value = "fix")]
        mode: String,
        text: Option<String>,
    },
    /// Report the tone of a text
    Tone { text: Option<String> },
}

fn read_text(arg: Option<String>) -> Result<String> {
    match arg {
        Some(text) => Ok(text),
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            let trimmed = buffer.trim().to_string();
            if trimmed.is_empty() {
                return Err(anyhow!("no text given (argument or stdin)"));
            }
            Ok(trimmed)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let store = SettingsStore::new(&args.settings);
    let settings = store.load_or_create();
    let client = AssistClient::new(&settings)?;

    match args.command {
        Command::Health => {
            let health = client.health().await?;
            println!(
                "service ok={} version={}",
                health.ok,
                health.version.as_deref().unwrap_or("unknown")
            );
        }
        Command::Check { text } => {
            let text = read_text(text)?;
            let issues = client.check(&text, &settings.language).await?;
            if issues.is_empty() {
                println!("no issues found");
            } else {
                for issue in &issues {
                    let hint = issue
                        .replacements
                        .first()
                        .map(|r| format!(" -> {}", r))
                        .unwrap_or_default();
                    println!("{}..{}: {}{}", issue.start, issue.end, issue.message, hint);
                }
                std::process::exit(1);
            }
        }
        Command::Rewrite { mode, text } => {
            let mode = RewriteMode::from_str(&mode).map_err(|e| anyhow!(e))?;
            let text = read_text(text)?;
            let rewritten = client.rewrite(&text, mode).await?;
            println!("{}", rewritten);
        }
        Command::Tone { text } => {
            let text = read_text(text)?;
            let report = client.tone(&text).await?;
            println!(
                "sentiment={} formality={} confidence={:.2}",
                report.sentiment, report.formality, report.confidence
            );
        }
    }

    Ok(())
}
