pub mod core;

use std::io::{BufRead, Write};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::core::composite::AcquisitionPlan;
use crate::core::config::PrestarterConfig;
use crate::core::downloader::Downloader;
use crate::core::error::{PrestarterError, PrestarterResult};
use crate::core::http::build_http_client;
use crate::core::layout::{ensure_launcher_jar, RuntimeLayout, LAUNCHER_JAR_NAME};
use crate::core::orchestrator::AcquisitionOrchestrator;
use crate::core::paths::Scope;
use crate::core::platform::PlatformDescriptor;

/// Ensure the configured runtime, fetch the launcher if configured, and
/// print the command that starts it.
pub async fn run() -> PrestarterResult<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,prestarter_lib=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = PrestarterConfig::discover()?;
    let platform = PlatformDescriptor::detect()?;
    info!("{} prestarter starting on {}", config.dialog_name(), platform);

    let downloader = Downloader::new(build_http_client(&config.user_agent())?);
    let orchestrator = AcquisitionOrchestrator::from_config(&config, platform, downloader.clone())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let dialog_name = config.dialog_name().to_string();
    let confirm = move |plan: &AcquisitionPlan| ask_download(&dialog_name, plan);
    let mut result = orchestrator.ensure_configured(Some(&confirm), &cancel).await;
    if !result.success {
        for err in &result.errors {
            error!("{}", err);
        }
        return Err(result
            .errors
            .pop()
            .unwrap_or_else(|| PrestarterError::Other("runtime acquisition failed".into())));
    }

    let layout = RuntimeLayout::from_installed(&result.installed, &platform)?;
    let launcher_root = orchestrator.paths().prepare(Scope::Private)?;
    let launcher_jar = match &config.launcher_download_url {
        Some(url) => ensure_launcher_jar(&downloader, url, &launcher_root, &cancel).await?,
        None => launcher_root.join(LAUNCHER_JAR_NAME),
    };

    let args = layout.launcher_args(&launcher_jar);
    info!("Runtime ready: {:?}", layout.java_bin);
    println!("{} {}", layout.java_bin.display(), args.join(" "));
    Ok(())
}

fn ask_download(dialog_name: &str, plan: &AcquisitionPlan) -> bool {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{dialog_name}: {plan} must be downloaded. Continue? [Y/n] ");
    let _ = stderr.flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "" | "y" | "yes")
}
