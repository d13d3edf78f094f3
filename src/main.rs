use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::metadata::LevelFilter;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use show_notify_lib::message::MessageKind;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
        .into()
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Pass {
    /// Announce events that were never announced.
    Fresh,
    /// Send the digest of events coming up soon.
    Upcoming,
}

impl From<Pass> for MessageKind {
    fn from(pass: Pass) -> Self {
        match pass {
            Pass::Fresh => MessageKind::Fresh,
            Pass::Upcoming => MessageKind::Upcoming,
        }
    }
}

#[derive(Parser)]
#[command(propagate_version = true)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Scrape the venue listing and store what was found.
    Crawl,
    /// Post announcements for stored events.
    Notify {
        #[arg(value_enum)]
        pass: Pass,
        /// Log messages instead of posting them and mark nothing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Fill missing artist, category and catalog data.
    Meta,
    /// Check a Graph access token and save it to the config file.
    Link {
        /// Token to store; defaults to the configured one.
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = show_notify_lib::load_config()?;

    let result = match cli.cmd {
        Cmd::Crawl => show_notify_lib::crawl(&config)
            .await
            .map(|saved| info!(saved, "events stored")),
        Cmd::Notify { pass, dry_run } => show_notify_lib::notify(&config, pass.into(), dry_run)
            .await
            .map(|report| {
                info!(
                    selected = report.selected,
                    sent = report.sent,
                    failed = report.failed,
                    "notification pass done"
                )
            }),
        Cmd::Meta => show_notify_lib::sync_metadata(&config)
            .await
            .map(|failed| info!(failed, "metadata pass done")),
        Cmd::Link { token } => show_notify_lib::link(token.as_deref()).await.map(|linked| {
            info!(
                user = ?linked.graph_user_name,
                expires_at = ?linked.graph_token_expires_at,
                "graph token saved"
            )
        }),
    };

    if let Err(err) = &result {
        error!("{:#}", err);
    }
    result
}
