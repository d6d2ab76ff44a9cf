//! vessel - build recipes into a content-addressed store
//!
//! This is the CLI application; every command is a thin wrapper over one
//! operation of the ops crate.

mod cli;
mod display;
mod error;
mod events;
mod logging;

use crate::cli::{Cli, Commands, GlobalArgs};
use crate::display::{colors_enabled, OutputRenderer};
use crate::error::CliError;
use crate::events::EventHandler;
use clap::Parser;
use std::process;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vessel_config::Config;
use vessel_events::EventReceiver;
use vessel_ops::{OperationResult, OpsContextBuilder, OpsCtx};
use vessel_types::{OutputFormat, PackageId};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.global.json, cli.global.debug);

    if let Err(e) = run(cli).await {
        match e {
            CliError::Failed { failed } => {
                info!(failed, "command finished with failures");
            }
            e => {
                error!("{e}");
                eprintln!("Error: {e}");
            }
        }
        process::exit(1);
    }
}

/// Main application logic
async fn run(cli: Cli) -> Result<(), CliError> {
    info!("Starting vessel v{}", env!("CARGO_PKG_VERSION"));

    // File (or defaults), then environment, then flags
    let mut config = Config::load_or_default(&cli.global.config).await?;
    config.merge_env()?;
    apply_cli_config(&mut config, &cli.global);
    if let Commands::Upload { url: Some(url), .. } = &cli.command {
        config.upload.url = Some(url.clone());
    }
    let shell_command = match &cli.command {
        Commands::Shell {
            print_env: false,
            command,
            ..
        } => Some(command.clone()),
        _ => None,
    };

    let json = cli.global.json || config.general.default_output == OutputFormat::Json;
    let colors = colors_enabled(config.general.color);
    let renderer = OutputRenderer::new(json, config.general.color);
    let mut event_handler = EventHandler::new(!json, colors);

    let (event_sender, event_receiver) = vessel_events::channel();
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let ctx = OpsContextBuilder::new()
        .with_config(config)
        .with_event_sender(event_sender)
        .with_cancel(cancel)
        .build()?;

    let result =
        execute_command_with_events(cli.command, ctx, event_receiver, &mut event_handler).await?;

    if let (Some(command), OperationResult::Shell(env)) = (shell_command, &result) {
        return Err(exec_shell(command, &env.path));
    }

    renderer.render_result(&result)?;
    let failures = result.failures();
    if !failures.is_empty() {
        renderer.render_failures(failures);
    }
    if !result.is_success() {
        return Err(CliError::Failed {
            failed: failures.len(),
        });
    }

    info!("Command completed successfully");
    Ok(())
}

/// Replace this process with `command`, or `$SHELL`, running under `path`
///
/// Only returns if the program could not be started.
fn exec_shell(command: Vec<String>, path: &str) -> CliError {
    use std::os::unix::process::CommandExt;

    let mut argv = command.into_iter();
    let program = argv.next().unwrap_or_else(|| {
        std::env::var("SHELL")
            .ok()
            .filter(|shell| !shell.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string())
    });
    info!(%program, "starting shell");
    let err = process::Command::new(&program).args(argv).env("PATH", path).exec();
    warn!(%program, error = %err, "could not start shell");
    CliError::Io(err)
}

/// Cancel `token` on the first Ctrl-C
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            token.cancel();
        }
    });
}

/// Execute command with concurrent event handling
async fn execute_command_with_events(
    command: Commands,
    ctx: OpsCtx,
    mut event_receiver: EventReceiver,
    event_handler: &mut EventHandler,
) -> Result<OperationResult, CliError> {
    let operation = command.name();
    let mut command_future = Box::pin(execute_command(command, ctx));

    loop {
        select! {
            result = &mut command_future => {
                while let Ok(event) = event_receiver.try_recv() {
                    event_handler.handle_event(&event);
                }
                if let Err(e) = &result {
                    tracing::debug!(operation, error = %e, "operation failed");
                }
                return result;
            }

            event = event_receiver.recv() => {
                if let Some(event) = event {
                    event_handler.handle_event(&event);
                }
            }
        }
    }
}

/// Execute the specified command
async fn execute_command(command: Commands, ctx: OpsCtx) -> Result<OperationResult, CliError> {
    let result = match command {
        Commands::Install { recipes, profile } => {
            OperationResult::InstallReport(vessel_ops::install(&ctx, &recipes, &profile.profile).await?)
        }
        Commands::Build { recipe } => OperationResult::Build(vessel_ops::build(&ctx, &recipe).await?),
        Commands::Calc { recipe } => OperationResult::Calc(vessel_ops::calc(&ctx, &recipe).await?),
        Commands::Pack { id } => OperationResult::Pack(vessel_ops::pack(&ctx, &PackageId::from(id.as_str())).await?),
        Commands::Upload {
            recipe, all, input_dir, ..
        } => OperationResult::Upload(vessel_ops::upload(&ctx, &recipe, all, input_dir.as_deref()).await?),
        Commands::Shell { recipes, .. } => {
            let inherited = std::env::var("PATH").ok();
            OperationResult::Shell(vessel_ops::shell_env(&ctx, &recipes, inherited.as_deref()).await?)
        }
        Commands::InstallCar { repo, id, profile } => OperationResult::InstallReport(
            vessel_ops::install_car(&ctx, &repo, &PackageId::from(id.as_str()), &profile.profile).await?,
        ),
        Commands::Gc => OperationResult::Gc(vessel_ops::gc(&ctx).await?),
        Commands::Link { id, profile } => OperationResult::Link(
            vessel_ops::link(&ctx, &PackageId::from(id.as_str()), &profile.profile).await?,
        ),
        Commands::Unlink { id, profile } => OperationResult::Link(
            vessel_ops::unlink(&ctx, &PackageId::from(id.as_str()), &profile.profile).await?,
        ),
        Commands::List { profile } => {
            OperationResult::PackageList(vessel_ops::list(&ctx, &profile.profile).await?)
        }
        Commands::Sum { recipe, path } => match (recipe, path) {
            (_, Some(path)) => OperationResult::Success(vessel_ops::sum_path(&ctx, &path).await?),
            (Some(recipe), None) => OperationResult::Sums(vessel_ops::record_sums(&ctx, &recipe).await?),
            (None, None) => {
                return Err(CliError::Ops(vessel_errors::OpsError::NoPackagesSpecified.into()));
            }
        },
        Commands::Keygen { force } => OperationResult::Key(vessel_ops::keygen(&ctx, force).await?),
        Commands::ExportKey { dir } => {
            let file = vessel_ops::export_key(&ctx, &dir).await?;
            OperationResult::Success(file.display().to_string())
        }
    };
    Ok(result)
}

/// Apply CLI configuration overrides (highest precedence)
fn apply_cli_config(config: &mut Config, global: &GlobalArgs) {
    if let Some(color) = global.color {
        config.general.color = color;
    }
    if let Some(dir) = &global.data_dir {
        config.paths.data_dir = Some(dir.clone());
    }
    if let Some(jobs) = global.jobs {
        config.general.parallelism = jobs;
    }
    if global.json {
        config.general.default_output = OutputFormat::Json;
    }
}
