//! Herald CLI entry point.
//!
//! Provides `send` to run a campaign, `dedup` to drop already-contacted rows
//! from a new list, and `check` to verify a contact list and that a channel's
//! backend is reachable.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use herald::channels::email::SmtpMailer;
use herald::channels::{
    ChannelSender, ChatSender, EmailSender, ExhaustionPolicy, MessengerSender, SmsSender,
};
use herald::config::{config_dir, CampaignConfig, Channel, HeraldConfig};
use herald::contacts::{ContactLoader, DedupEngine, Table};
use herald::device::AdbBridge;
use herald::dispatch::{run_interruptible, CampaignRunner, CancelToken, DelayPlanner, TracingSink};
use herald::driver::playwright::PlaywrightDriver;
use herald::driver::BrowserDriver;

/// Rejected rows listed by `herald check`.
const REJECTED_PREVIEW: usize = 10;

/// Herald: bulk messaging campaigns.
#[derive(Parser)]
#[command(name = "herald", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Send one personalized message to every contact in a table.
    Send(SendArgs),
    /// Write the rows of a candidate table that are not in a base table.
    Dedup {
        /// Table of contacts already reached.
        #[arg(long)]
        base: PathBuf,
        /// New table to filter.
        #[arg(long)]
        candidate: PathBuf,
        /// Where to write the unique rows.
        #[arg(long)]
        output: PathBuf,
    },
    /// Validate config, optionally load a contact list, and probe the backend of a channel.
    Check(CheckArgs),
}

/// Options of `herald check`.
#[derive(clap::Args)]
struct CheckArgs {
    /// Channel to probe.
    #[arg(long, value_enum)]
    channel: Channel,
    /// Contact table to load without sending.
    #[arg(long)]
    contacts: Option<PathBuf>,
    /// First data row to load (1-based).
    #[arg(long)]
    row_start: Option<usize>,
    /// Last data row to load.
    #[arg(long)]
    row_end: Option<usize>,
    /// Skip phone numbers starting with this prefix.
    #[arg(long)]
    skip_prefix: Option<String>,
}

/// Options of `herald send`.
#[derive(clap::Args)]
struct SendArgs {
    /// Delivery channel.
    #[arg(long, value_enum)]
    channel: Channel,
    /// Contact table (CSV with a header row).
    #[arg(long)]
    contacts: PathBuf,
    /// Message template; `{name}` is replaced per contact.
    #[arg(long, conflicts_with = "message_file")]
    message: Option<String>,
    /// Read the message template from a file.
    #[arg(long)]
    message_file: Option<PathBuf>,
    /// File sent with every message.
    #[arg(long)]
    attachment: Option<PathBuf>,
    /// Seconds between messages (overrides config).
    #[arg(long)]
    delay: Option<u64>,
    /// First data row to process (1-based).
    #[arg(long)]
    row_start: Option<usize>,
    /// Last data row to process.
    #[arg(long)]
    row_end: Option<usize>,
    /// Skip phone numbers starting with this prefix.
    #[arg(long)]
    skip_prefix: Option<String>,
    /// Email subject (overrides config).
    #[arg(long)]
    subject: Option<String>,
    /// Directory for the JSON campaign log.
    #[arg(long)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Secrets such as the email app password usually live in .env.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: failed to read .env: {e}");
        }
    }
    let cli = Cli::parse();

    match cli.command {
        Command::Send(args) => handle_send(args).await,
        Command::Dedup {
            base,
            candidate,
            output,
        } => handle_dedup(&base, &candidate, &output),
        Command::Check(args) => handle_check(args).await,
    }
}

/// Run one campaign until it completes or the operator presses Ctrl-C.
async fn handle_send(args: SendArgs) -> anyhow::Result<()> {
    let logs_dir = match &args.logs_dir {
        Some(dir) => dir.clone(),
        None => config_dir()?.join("logs"),
    };
    let guard = herald::logging::init_production(&logs_dir)?;
    info!(logs = %guard.log_dir().display(), "campaign log enabled");

    let file_config = HeraldConfig::load().context("failed to load configuration")?;
    let template = match (&args.message, &args.message_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read message file {}", path.display()))?,
        (None, None) => String::new(),
    };
    if template.trim().is_empty() && args.attachment.is_none() {
        bail!("nothing to send: give --message, --message-file or --attachment");
    }

    let config = campaign_config(&file_config, &args, template);
    config.validate()?;
    let sender = build_sender(&file_config, &config)?;

    let cancel = CancelToken::new();
    let mut runner = CampaignRunner::new(config, sender, Arc::new(TracingSink), cancel.clone());
    let report = run_interruptible(runner.run_path(&args.contacts), ctrl_c, &cancel)
        .await
        .context("campaign aborted")??;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Resolves on Ctrl-C; never resolves when the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn campaign_config(file_config: &HeraldConfig, args: &SendArgs, template: String) -> CampaignConfig {
    let mut config = file_config.campaign(args.channel, template, |key| std::env::var(key).ok());
    if let Some(delay) = args.delay {
        config = config.with_delay(delay);
    }
    if args.row_start.is_some() || args.row_end.is_some() {
        let start = args.row_start.unwrap_or(config.row_start);
        let end = args.row_end.unwrap_or(config.row_end);
        config = config.with_rows(start, end);
    }
    if args.skip_prefix.is_some() {
        config = config.with_skip_prefix(args.skip_prefix.clone());
    }
    if let (Some(subject), Some(creds)) = (&args.subject, &mut config.email) {
        creds.subject = subject.clone();
    }
    config.with_attachment(args.attachment.clone())
}

fn build_sender(file_config: &HeraldConfig, config: &CampaignConfig) -> anyhow::Result<Arc<dyn ChannelSender>> {
    let planner = DelayPlanner::from_config(config);
    let exhaustion = ExhaustionPolicy::from_flag(config.best_effort_after_timeout);
    let browser = &file_config.browser;

    let sender: Arc<dyn ChannelSender> = match config.channel {
        Channel::Chat => Arc::new(ChatSender::new(
            Arc::new(PlaywrightDriver::new(&browser.bridge_url)),
            &browser.chat_base_url,
            planner,
            browser.ready_timeout_secs,
            exhaustion,
        )),
        Channel::Messenger => Arc::new(MessengerSender::new(
            Arc::new(PlaywrightDriver::new(&browser.bridge_url)),
            &browser.messenger_base_url,
            planner,
            browser.ready_timeout_secs,
            exhaustion,
        )),
        Channel::Sms => {
            let device = &file_config.device;
            Arc::new(SmsSender::new(
                Arc::new(AdbBridge::new(&device.adb_path, device.serial.clone())),
                planner,
                (device.send_button_x, device.send_button_y),
                exhaustion,
            ))
        }
        Channel::Email => {
            let creds = config
                .email
                .as_ref()
                .context("email campaigns need [email].address and a secret")?;
            let (host, port) = file_config.email.relay_for(&creds.address);
            info!(host = %host, port, "using SMTP relay");
            let mailer = SmtpMailer::new(creds, &host, port)?;
            Arc::new(EmailSender::new(creds, Arc::new(mailer), planner)?)
        }
    };
    Ok(sender)
}

/// Write the unique rows of `candidate` to `output`.
fn handle_dedup(base: &Path, candidate: &Path, output: &Path) -> anyhow::Result<()> {
    herald::logging::init_cli();
    let base_table = Table::from_path(base)?;
    let candidate_table = Table::from_path(candidate)?;

    let report = DedupEngine::diff(&base_table, &candidate_table);
    report.write(output)?;
    info!(
        column = %report.source_column,
        unique = report.unique_rows.len(),
        duplicates = report.duplicate_count,
        output = %output.display(),
        "dedup complete"
    );
    println!(
        "{} unique, {} duplicates (matched on {})",
        report.unique_rows.len(),
        report.duplicate_count,
        report.source_column
    );
    Ok(())
}

/// Validate configuration for a channel, report how many contacts a table
/// yields, and probe the channel backend once.
async fn handle_check(args: CheckArgs) -> anyhow::Result<()> {
    herald::logging::init_cli();
    let channel = args.channel;
    let file_config = HeraldConfig::load().context("failed to load configuration")?;
    let mut config = file_config.campaign(channel, "", |key| std::env::var(key).ok());
    let start = args.row_start.unwrap_or(config.row_start);
    let end = args.row_end.unwrap_or(config.row_end);
    config = config.with_rows(start, end);
    if args.skip_prefix.is_some() {
        config = config.with_skip_prefix(args.skip_prefix);
    }
    config.validate()?;

    if let Some(path) = &args.contacts {
        let table = Table::from_path(path)
            .with_context(|| format!("failed to read contacts from {}", path.display()))?;
        let (contacts, rejected) = ContactLoader::from_config(&config).load_detailed(&table);
        println!(
            "{} contacts accepted, {} rows rejected",
            contacts.len(),
            rejected.len()
        );
        for row in rejected.iter().take(REJECTED_PREVIEW) {
            println!("  row {}: {}", row.row_number, row.reason);
        }
    }

    match channel {
        Channel::Chat | Channel::Messenger => {
            let driver = PlaywrightDriver::new(&file_config.browser.bridge_url);
            driver
                .page_state()
                .await
                .with_context(|| format!("browser bridge at {} is not reachable", driver.base_url()))?;
            println!("browser bridge: ok ({})", driver.base_url());
        }
        Channel::Sms => {
            let device = &file_config.device;
            AdbBridge::new(&device.adb_path, device.serial.clone())
                .wait_ready()
                .await
                .context("no Android device online")?;
            println!("device: ok");
        }
        Channel::Email => {
            let address = config
                .email
                .as_ref()
                .map(|creds| creds.address.as_str())
                .unwrap_or_default();
            let (host, port) = file_config.email.relay_for(address);
            println!("email: credentials present, relay {host}:{port}");
        }
    }
    Ok(())
}
