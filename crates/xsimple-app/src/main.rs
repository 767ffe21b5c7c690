//! XSimple application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Install the tracing subscriber (stderr, so logs never split an answer)
//! 3. Build the conversation controller and subscribe the terminal view
//! 4. Read queries and commands from stdin, or answer a single `--once` query

mod cli;
mod render;
mod view;

use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use xsimple_chat::{ConversationController, CycleOutcome};
use xsimple_core::XSimpleConfig;

use crate::cli::{CliArgs, Command, HELP};
use crate::render::render_report;
use crate::view::View;

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

/// Wait for a spawned cycle, cancelling it on Ctrl-C.
async fn wait_for_cycle(controller: &ConversationController, mut handle: JoinHandle<CycleOutcome>) {
    let joined = tokio::select! {
        joined = &mut handle => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted; cancelling the answer in flight");
            controller.cancel();
            handle.await
        }
    };
    match joined {
        Ok(outcome) => tracing::debug!(outcome = ?outcome, "Cycle finished"),
        Err(e) => tracing::warn!(error = %e, "Cycle task failed"),
    }
}

async fn run_once(controller: &ConversationController, query: &str) -> Result<(), Box<dyn Error>> {
    tokio::select! {
        outcome = controller.submit(query) => match outcome? {
            CycleOutcome::Failed { error, .. } => Err(error.into()),
            _ => Ok(()),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
            Ok(())
        }
    }
}

async fn run_interactive(controller: &Arc<ConversationController>) -> Result<(), Box<dyn Error>> {
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut active: Option<JoinHandle<CycleOutcome>> = None;

    loop {
        let line = tokio::select! {
            line = lines.next() => line,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            // stdin closed: let the answer in flight finish.
            if let Some(handle) = active.take() {
                wait_for_cycle(controller, handle).await;
            }
            break;
        };
        let line = line?;

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Help => println!("{}", HELP),
            Command::Unknown(cmd) => println!("[unknown command {}] {}", cmd, HELP),
            Command::Quit => break,
            Command::Cancel => {
                if !controller.cancel() {
                    println!("[nothing to cancel]");
                }
            }
            Command::Reset => {
                if let Err(e) = controller.reset() {
                    println!("[{}]", e);
                }
            }
            Command::Report => match controller.current_report() {
                Some(report) => print!("{}", render_report(&report)),
                None => println!("[no report yet]"),
            },
            Command::Query(query) => match controller.spawn_submit(query) {
                Ok(handle) => active = Some(handle),
                Err(e) if e.is_rejection() => println!("[{}]", e),
                Err(e) => return Err(e.into()),
            },
        }
    }

    controller.shutdown();
    if let Some(handle) = active.take() {
        wait_for_cycle(controller, handle).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing so its log level can seed the filter.
    let config_file = args.resolve_config_path();
    let loaded = XSimpleConfig::load(&config_file);
    let config_level = loaded
        .as_ref()
        .map(|c| c.general.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_tracing(&args.resolve_log_level(&config_level));

    tracing::info!("Starting XSimple v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match loaded {
        Ok(config) => {
            tracing::info!(path = %config_file.display(), "Configuration loaded");
            config
        }
        Err(e) if config_file.exists() => {
            tracing::warn!(path = %config_file.display(), error = %e, "Invalid config; using defaults");
            XSimpleConfig::default()
        }
        Err(_) => {
            tracing::debug!(path = %config_file.display(), "No config file; using defaults");
            XSimpleConfig::default()
        }
    };
    args.apply_overrides(&mut config);
    if args.once.is_some() {
        config.conversation.greeting.clear();
    }
    tracing::debug!(
        unit_delay_ms = config.stream.unit_delay_ms,
        granularity = ?config.stream.granularity,
        cancel_policy = ?config.conversation.cancel_policy,
        "Effective settings"
    );

    let controller = Arc::new(ConversationController::new(&config));
    let stop_view = CancellationToken::new();
    let view = tokio::spawn(View::new(&controller).run(stop_view.clone()));

    let result = match args.once {
        Some(ref query) => run_once(&controller, query).await,
        None => {
            println!("{}", HELP);
            run_interactive(&controller).await
        }
    };

    controller.shutdown();
    stop_view.cancel();
    if let Err(e) = view.await {
        tracing::warn!(error = %e, "View task failed");
    }

    result
}
