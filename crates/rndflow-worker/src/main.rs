// Entry point of the RnDflow job agent.
//
// Started inside the execution environment as
// `rndflow-execute --host <URL> --job <ID>`. Runs the job to completion and
// exits with a code describing how far it got; the script's own exit code is
// reported to the server instead.

use clap::Parser;
use rndflow_client::RetryingTransport;
use rndflow_common::constants::exit_codes;
use rndflow_common::{init_logging, HostContext, Settings};
use rndflow_sdk::AgentPackage;
use rndflow_worker::{Job, JobRunner};
use std::sync::Arc;

/// Command-line arguments of the job agent.
#[derive(Parser, Debug)]
#[command(name = "rndflow-execute", about = "RnDflow job agent", version)]
struct Args {
    /// Control plane URL; `/api` is appended. Overrides RNDFLOW_API_SERVER.
    #[arg(long)]
    host: Option<String>,

    /// Identifier of the job to execute.
    #[arg(long)]
    job: u64,
}

fn main() {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    let exit_code = runtime.block_on(async move { run(args).await });

    std::process::exit(exit_code);
}

async fn run(args: Args) -> i32 {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("rndflow-execute: {e}");
            return exit_codes::STARTUP_FAILED;
        }
    };
    if let Err(e) = init_logging(&settings) {
        eprintln!("rndflow-execute: {e:#}");
    }

    let base_url = match settings.api_base_url(args.host.as_deref()) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!("{}", e);
            return exit_codes::STARTUP_FAILED;
        }
    };

    tracing::info!(
        "Job agent {} ({}) starting.",
        AgentPackage::VERSION,
        AgentPackage::COMMIT_HASH
    );
    tracing::info!("  host = {}", base_url);
    tracing::info!("  job  = {}", args.job);

    let host_context = HostContext::new(settings);
    install_signal_handlers(Arc::clone(&host_context));

    let transport = match RetryingTransport::new(&host_context, &base_url) {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            tracing::error!("Failed to create the API client: {:#}", e);
            return exit_codes::STARTUP_FAILED;
        }
    };

    let mut job = Job::new(args.job, host_context.job_root(args.job));
    let runner = JobRunner::new(Arc::clone(&host_context), transport, args.job);
    let exit_code = runner.run(&mut job).await;

    if let Some(reason) = host_context.shutdown_reason() {
        tracing::warn!("Job agent was shut down: {}", reason);
    }
    tracing::info!("Job agent exiting with code {}", exit_code);
    exit_code
}

/// Route Ctrl-C and SIGTERM to the host shutdown token.
fn install_signal_handlers(host_context: Arc<HostContext>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate =
                signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => host_context.shutdown("Ctrl-C received"),
                _ = terminate.recv() => host_context.shutdown("SIGTERM received"),
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                host_context.shutdown("Ctrl-C received");
            }
        }
    });
}
