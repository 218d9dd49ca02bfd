//! CLI command handling
//!
//! Loads scripts, drives sessions and formats output.

mod report;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::task::JoinSet;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::engine::{
    compile, ChannelEmitter, Emitter, EngineEvent, NullEmitter, SessionContext, SessionFactory,
};
use crate::scenario::Script;
use crate::transport::{Connector, WsConnector};

pub use report::Report;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            script,
            sessions,
            target,
            log_file: _,
        } => {
            let config = Config::load()?;
            let connector: Arc<dyn Connector> = Arc::new(WsConnector);
            let report = run(&script, sessions, target.as_deref(), &config, connector).await?;
            report.print();

            if report.failed > 0 {
                return Err(Error::SessionsFailed {
                    failed: report.failed,
                    total: report.completed + report.failed,
                });
            }
            Ok(())
        }

        Commands::Check { script } => check(&script),
    }
}

/// Run `sessions` sessions of a script and aggregate their events
///
/// Sessions are launched `run.arrival_interval_ms` apart and run
/// concurrently. In deferred mode each session gets a connection to the
/// target opened here, before the session starts.
pub async fn run(
    path: &Path,
    sessions: Option<usize>,
    target: Option<&str>,
    config: &Config,
    connector: Arc<dyn Connector>,
) -> Result<Report> {
    let script = Script::load(path)?;
    let fallback = target.or(config.defaults.target.as_deref());
    let engine_config = script.engine_config(fallback);
    let funcs = Arc::new(script.functions()?);

    let (emitter, mut events) = ChannelEmitter::new();
    let emitter: Arc<dyn Emitter> = Arc::new(emitter);
    let factory = compile(
        &script.scenario,
        engine_config,
        connector.clone(),
        emitter.clone(),
    )?;

    let total = sessions.unwrap_or(config.defaults.sessions);
    let interval = Duration::from_millis(config.run.arrival_interval_ms);

    println!(
        "\n{} {} {}",
        "Running:".blue().bold(),
        path.display().to_string().white().bold(),
        format!("({} sessions against {})", total, describe_target(&factory)).dimmed()
    );

    let mut tasks = JoinSet::new();
    for i in 0..total {
        if i > 0 && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
        let ctx = SessionContext::new(script.config.variables.clone(), funcs.clone());
        tasks.spawn(run_session(
            factory.clone(),
            connector.clone(),
            emitter.clone(),
            ctx,
        ));
    }

    let mut outcomes = Vec::with_capacity(total);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(success) => outcomes.push(success),
            Err(e) => {
                tracing::error!(error = %e, "Session task did not finish");
                outcomes.push(false);
            }
        }
    }

    // Once the last sender is gone the stream ends
    drop(emitter);
    drop(factory);

    let mut report = Report::default();
    while let Some(event) = events.recv().await {
        report.record(event);
    }
    for success in outcomes {
        report.record_outcome(success);
    }

    tracing::info!(
        completed = report.completed,
        failed = report.failed,
        "Run finished"
    );
    Ok(report)
}

/// Run one session, opening its connection first in deferred mode
///
/// A failed pre-connection is reported as an `error` event like any other
/// connection failure.
async fn run_session(
    factory: SessionFactory,
    connector: Arc<dyn Connector>,
    emitter: Arc<dyn Emitter>,
    mut ctx: SessionContext,
) -> bool {
    let config = factory.config();
    if config.defer_connection && !config.target.is_empty() {
        match connector.connect(&config.target).await {
            Ok(connection) => ctx = ctx.with_connection(connection),
            Err(e) => {
                tracing::warn!(url = %config.target, error = %e, "Pre-connection failed");
                emitter.emit(EngineEvent::Error(e.code().to_string()));
                return false;
            }
        }
    }

    factory.run(ctx).await.is_success()
}

fn describe_target(factory: &SessionFactory) -> String {
    let config = factory.config();
    match (config.target.is_empty(), config.defer_connection) {
        (true, _) => "no target".to_string(),
        (false, true) => format!("{}, deferred", config.target),
        (false, false) => config.target.clone(),
    }
}

/// Load and compile a script, then print what it would do
fn check(path: &Path) -> Result<()> {
    let script = Script::load(path)?;
    let funcs = script.functions()?;
    let config = Config::load()?;
    let engine_config = script.engine_config(config.defaults.target.as_deref());
    let factory = compile(
        &script.scenario,
        engine_config,
        Arc::new(WsConnector),
        Arc::new(NullEmitter),
    )?;

    println!(
        "{} {}",
        "✓".green(),
        path.display().to_string().white().bold()
    );
    println!("  Target: {}", describe_target(&factory));
    println!(
        "  Steps: {} ({} requests)",
        factory.step_count(),
        factory.request_count()
    );
    for (i, step) in factory.describe().iter().enumerate() {
        println!("    {:>3}  {}", i, step.dimmed());
    }

    if !script.config.variables.is_empty() {
        let names: Vec<&str> = script.config.variables.keys().map(String::as_str).collect();
        println!("  Variables: {}", names.join(", "));
    }
    println!(
        "  Functions: {}",
        funcs
            .names()
            .iter()
            .map(|name| format!("${}", name))
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(())
}
