use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shared::{
    domain::{FieldName, Phase},
    error::FailureReport,
};
use submission_core::{ControllerEvent, HttpRelay, SubmissionController};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(name = "contact_cli", about = "Send a message through the contact form relay")]
struct Cli {
    /// Settings file; defaults to ./contact.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit one message and report every phase change.
    Send(SendArgs),
    /// Print the effective settings with the access key redacted.
    Settings,
}

#[derive(clap::Args, Debug)]
struct SendArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    message: String,
    /// Stay until the result banner reverts to idle.
    #[arg(long)]
    linger: bool,
    /// Emit events and failures as JSON lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Command::Send(args) => send(&settings, args).await,
        Command::Settings => {
            print_settings(&settings);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn send(settings: &Settings, args: SendArgs) -> Result<ExitCode> {
    let access_key = settings.require_access_key()?;
    let endpoint = settings.relay_endpoint_url()?;
    let http = reqwest::Client::builder()
        .timeout(settings.request_timeout())
        .build()
        .context("failed to build relay http client")?;
    let relay = HttpRelay::with_client(http, endpoint.as_str(), access_key);
    let relay_endpoint = relay.endpoint().to_owned();
    let controller = SubmissionController::new(Arc::new(relay), settings.controller_settings());
    info!(controller = %controller.id(), endpoint = %relay_endpoint, "sending contact message");

    let printer = spawn_event_printer(controller.subscribe_events(), args.json);
    let mut revert_watch = controller.subscribe_events();

    controller.edit_field(FieldName::Name, args.name).await?;
    controller.edit_field(FieldName::Email, args.email).await?;
    controller.edit_field(FieldName::Message, args.message).await?;

    let exit = match controller.submit().await {
        Ok(Phase::Succeeded) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            report_failure(&FailureReport::from(&err), args.json)?;
            ExitCode::from(2)
        }
    };

    if args.linger && controller.phase().await.is_transient() {
        let deadline = controller.settings().revert_after.saturating_add(Duration::from_secs(1));
        if tokio::time::timeout(deadline, wait_for_idle(&mut revert_watch))
            .await
            .is_err()
        {
            warn!("result banner did not revert within {deadline:?}");
        }
    }

    controller.teardown().await;
    // Dropping the last handle closes the event channel and ends the printer.
    drop(controller);
    if let Err(err) = printer.await {
        warn!("event printer stopped abnormally: {err}");
    }
    Ok(exit)
}

fn spawn_event_printer(
    events: broadcast::Receiver<ControllerEvent>,
    json: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = BroadcastStream::new(events);
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) if json => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!("failed to encode event: {err}"),
                },
                Ok(event) => print_event(&event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event printer lagged behind");
                }
            }
        }
    })
}

fn print_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::PhaseChanged { phase, at } => {
            let stamp = at.format("%H:%M:%S");
            match phase.banner() {
                Some(banner) => println!("[{stamp}] {:<10} {banner}", phase.label()),
                None => println!("[{stamp}] {}", phase.label()),
            }
        }
        ControllerEvent::FieldsCleared { at } => {
            println!("[{}] form cleared", at.format("%H:%M:%S"));
        }
        ControllerEvent::DeliveryFailed { report, at } => {
            println!("[{}] {:?}: {}", at.format("%H:%M:%S"), report.code, report.message);
        }
        ControllerEvent::FieldEdited { .. } => {}
    }
}

async fn wait_for_idle(events: &mut broadcast::Receiver<ControllerEvent>) {
    loop {
        match events.recv().await {
            Ok(ControllerEvent::PhaseChanged {
                phase: Phase::Idle, ..
            }) => return,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn report_failure(report: &FailureReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
    } else {
        eprintln!("Error: {}", report.message);
    }
    Ok(())
}

fn print_settings(settings: &Settings) {
    let access_key = match settings.require_access_key() {
        Ok(_) => "configured",
        Err(_) => "missing",
    };
    println!("relay_endpoint       = {}", settings.relay_endpoint);
    println!("access_key           = <{access_key}>");
    println!("revert_after_secs    = {}", settings.revert_after_secs);
    println!("request_timeout_secs = {}", settings.request_timeout_secs);
}
