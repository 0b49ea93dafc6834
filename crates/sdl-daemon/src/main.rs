mod stubs;

use std::sync::Arc;

use clap::Parser;
use sdl_app_manager::external::{HmiMessage, MobileMessage};
use sdl_app_manager::ids::{ConnectionKey, DeviceHandle, PolicyAppId};
use sdl_app_manager::model::hmi_state::AppCapabilities;
use sdl_app_manager::request::RequestController;
use sdl_app_manager::resumption::{JsonFileResumptionStorage, ResumeController};
use sdl_app_manager::state::StateController;
use sdl_app_manager::{ApplicationManager, ApplicationSet};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::stubs::{
    AllowAllPolicy, DemoHmiFactory, DemoMobileFactory, LoggingMessageRouter,
    LoggingResumptionDataRestorer, NoAttenuationCapabilities,
};

/// Process harness that wires the application manager core against
/// stub collaborators and drives a scripted registration/activation/
/// resumption scenario (spec §1: the transport, protocol, RPC command
/// factories, and policy PT machinery this depends on are all out of
/// scope and implemented here only as logging stand-ins).
#[derive(Debug, Parser)]
#[command(name = "sdl-daemon", version, about)]
struct Cli {
    /// Verbosity: repeat for more detail (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Override the resumption store path instead of the one resolved
    /// from config.
    #[arg(long)]
    resumption_store: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut daemon_config = sdl_config::load_config_or_default();
    if let Some(path) = cli.resumption_store {
        daemon_config.resumption_storage_path = path;
    }
    let config = daemon_config.to_core_config();
    info!(thread_pool_size = config.thread_pool_size, "configuration loaded");

    let cancel = CancellationToken::new();
    let apps = ApplicationSet::new();

    let (request_controller, mut worker_handles) = RequestController::spawn(config.clone(), cancel.clone());

    let router = Arc::new(LoggingMessageRouter);
    let state_controller = Arc::new(StateController::new(
        apps.clone(),
        router.clone(),
        Arc::new(NoAttenuationCapabilities),
        None,
    ));

    let storage = Arc::new(
        JsonFileResumptionStorage::open(daemon_config.resumption_storage_path.clone())
            .await
            .map_err(|e| miette::miette!("failed to open resumption store: {e}"))?,
    );
    let resume_controller = Arc::new(ResumeController::new(
        apps.clone(),
        config.clone(),
        storage,
        Arc::clone(&state_controller),
        Arc::new(AllowAllPolicy),
        router.clone(),
        Arc::new(LoggingResumptionDataRestorer),
    ));
    worker_handles.extend(resume_controller.spawn(cancel.clone()));

    let manager = ApplicationManager::new(
        apps,
        config,
        request_controller,
        state_controller,
        resume_controller,
        Arc::new(DemoMobileFactory),
        Arc::new(DemoHmiFactory),
        Arc::new(AllowAllPolicy),
        router,
    );

    run_demo_scenario(&manager).await?;

    cancel.cancel();
    for handle in worker_handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Registers one application, routes a mobile request through it,
/// broadcasts its HMI status, and exercises the resumption entry point
/// — enough to show every subsystem's wiring is live.
async fn run_demo_scenario(manager: &ApplicationManager) -> miette::Result<()> {
    let connection_key = ConnectionKey(1);
    let hmi_app_id = manager
        .register_application(
            PolicyAppId::from("com.example.navigator"),
            connection_key,
            DeviceHandle(1),
            AppCapabilities {
                is_media: false,
                is_navi: true,
                is_voice_communication: false,
            },
        )
        .await;
    info!(%hmi_app_id, "demo application registered");

    manager
        .handle_mobile_message(MobileMessage {
            function_id: 1,
            correlation_id: manager.next_correlation_id(),
            connection_key,
            params: serde_json::json!({"rpc": "RegisterAppInterface"}),
            binary_payload: None,
        })
        .await
        .map_err(|e| miette::miette!("mobile message handling failed: {e}"))?;

    manager
        .handle_hmi_message(HmiMessage {
            function_id: 2,
            correlation_id: Some(manager.next_correlation_id()),
            params: serde_json::json!({"rpc": "BasicCommunication.OnReady"}),
        })
        .await;

    manager
        .broadcast_hmi_status(connection_key)
        .await
        .map_err(|e| miette::miette!("broadcasting HMI status failed: {e}"))?;

    let had_record = manager
        .start_resumption(connection_key, "demo-hash")
        .await
        .map_err(|e| miette::miette!("starting resumption failed: {e}"))?;
    info!(had_record, "resumption requested for demo application");

    manager.unregister_application(connection_key).await;
    Ok(())
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}
