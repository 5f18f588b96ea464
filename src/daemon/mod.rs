pub mod service_manager;
mod lockfile;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, Paths};
use crate::control_plane::{self, IpcToken};
use crate::identity::Identity;
use crate::overlay::{Engine, EventBus};

use lockfile::DaemonLock;
pub use service_manager::{ServiceManager, platform_service_manager};

/// `install/start/stop` delegate to the platform service manager and wait
/// this long for shutdown to finish before force-exiting (spec §4.1).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The `--env` flag on `run` (spec §6): only changes the default log
/// verbosity, never program behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            other => anyhow::bail!("invalid --env value {other:?}, expected development|production"),
        }
    }
}

/// Options for the `run` verb: runs the daemon synchronously in the current
/// process (spec §4.1 and §6).
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides `Paths` discovery (`GOCONNECT_ROOT` / `~/.goconnect`). Not
    /// exposed as a CLI flag; lets tests and the e2e harness isolate state
    /// under a temp directory.
    pub root: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub env: Environment,
    /// Lets tests and the e2e harness drive shutdown without signals.
    pub cancel: Option<CancellationToken>,
}

/// Installs a tracing subscriber. A log file that can't be opened is never
/// fatal (spec §4.1): the daemon falls back to stderr-only and keeps
/// running.
fn init_logging(log_path: Option<&Path>, env: Environment) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_directive = match env {
        Environment::Development => "goconnect_daemon=debug,info",
        Environment::Production => "goconnect_daemon=info,warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match log_path.map(daily_roller) {
        Some(Ok(roller)) => {
            let (writer, guard) = tracing_appender::non_blocking(roller);
            (Some(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        Some(Err(err)) => {
            eprintln!(
                "warning: failed to open log file {}: {err:#}; logging to stderr only",
                log_path.expect("log_path is Some when daily_roller was called").display()
            );
            (None, None)
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(stderr_layer).with(file_layer);
    // `run` may be invoked more than once in-process by tests; a second
    // `try_init` failing is not a startup error.
    let _ = registry.try_init();
    guard
}

/// Builds a daily-rotating file appender rooted at `path`'s parent
/// directory, using its file name as the rotation prefix (spec §2.1:
/// "non-blocking file layer, rotated daily").
fn daily_roller(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create log directory: {}", dir.display()))?;
    let prefix = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("goconnectd.log"));
    Ok(tracing_appender::rolling::daily(dir, prefix))
}

/// `run` — the long-lived process: loads identity and config, stands up
/// the overlay engine (C5), the RPC and HTTP/SSE control planes (C3), and
/// supervises everything until shutdown (spec §4.1, dependency order
/// C2 → C1 → C4 → C5 → C3, though C4 is engine-owned and created lazily on
/// `connect`).
pub async fn run(opts: RunOptions) -> Result<()> {
    let _log_guard = init_logging(opts.log_path.as_deref(), opts.env);

    let paths = Paths::discover_with_override(opts.root.as_deref()).context("failed to resolve GoConnect paths")?;
    paths.ensure_root_exists()?;
    let mut lock = DaemonLock::acquire(&paths.root)?;

    let config_path = opts.config_path.clone().unwrap_or_else(|| paths.config.clone());
    let config = Config::load(&config_path).await?;
    let health_check_interval = Duration::from_secs(config.daemon.health_check_interval.max(1));

    let identity = Identity::load_or_generate(&paths).context("failed to load or create device identity")?;
    info!(public_key = identity.public_key_base64(), "device identity ready");

    let cancel = opts.cancel.unwrap_or_default();
    spawn_shutdown_signal_task(cancel.clone());

    let events = EventBus::new();
    let engine = Arc::new(
        Engine::new(paths.clone(), config.clone(), identity, events)
            .await
            .context("failed to start overlay engine")?,
    );
    engine.start(cancel.clone()).await;

    let token = Arc::new(IpcToken::generate(&paths.ipc_token).await.context("failed to generate IPC token")?);

    let rpc_handle = spawn_rpc_surface(&paths, engine.clone(), token.clone(), cancel.clone());
    let http_handle = spawn_http_surface(&config, engine.clone(), cancel.clone()).await?;

    supervise(health_check_interval, engine.clone(), cancel.clone()).await;

    info!("shutdown signal received, stopping control planes");
    cancel.cancel();
    let shutdown = async {
        let _ = rpc_handle.await;
        let _ = http_handle.await;
        engine.stop().await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, shutdown).await.is_err() {
        warn!("shutdown exceeded {SHUTDOWN_GRACE:?} grace period, forcing exit");
    }

    if let Err(err) = IpcToken::cleanup(&paths.ipc_token).await {
        warn!(%err, "failed to remove IPC token file during shutdown");
    }
    if let Err(err) = lock.release() {
        warn!(%err, "failed to remove daemon lock file during shutdown");
    }
    info!("shutdown complete");
    Ok(())
}

fn spawn_rpc_surface(
    paths: &Paths,
    engine: Arc<Engine>,
    token: Arc<IpcToken>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    #[cfg(unix)]
    {
        let socket_path = paths.socket.clone();
        tokio::spawn(async move {
            if let Err(err) = control_plane::rpc::serve_unix(&socket_path, engine, token, cancel).await {
                error!(%err, "RPC surface exited with error");
            }
        })
    }
    #[cfg(windows)]
    {
        let _ = paths;
        tokio::spawn(async move {
            if let Err(err) =
                control_plane::rpc::serve_windows_pipe(crate::config::WINDOWS_PIPE_NAME, engine, token, cancel)
                    .await
            {
                error!(%err, "RPC surface exited with error");
            }
        })
    }
}

async fn spawn_http_surface(
    config: &Config,
    engine: Arc<Engine>,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let port = config.effective_local_port(None);
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP/SSE bridge on {addr}"))?;
    info!(%addr, "HTTP/SSE bridge listening");

    let directory_origin = config.directory_url().map(str::to_string);
    let router = control_plane::http::router(engine, directory_origin);
    let shutdown = cancel.clone();
    Ok(tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            error!(%err, "HTTP/SSE bridge exited with error");
        }
    }))
}

/// The main supervision tick (spec §4.1): waits on `cancel` or ticks every
/// `interval`, measuring wall-clock delta between ticks. A delta exceeding
/// `3x interval` means the process was asleep (system suspend/resume) and
/// the engine is poked to resync immediately.
async fn supervise(interval: Duration, engine: Arc<Engine>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last = Instant::now();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            now = ticker.tick() => {
                let delta = now.duration_since(last);
                last = now;
                if resume_detected(interval, delta) {
                    info!(?delta, ?interval, "detected system resume, poking overlay engine to reconnect");
                    engine.poke_reconnect().await;
                }
            }
        }
    }
}

/// Pure predicate behind the resume-detection ticker: a missed tick under
/// scheduler pressure should never spuriously trigger a reconnect, so the
/// threshold is `3x` the configured interval (spec §4.1, §8).
fn resume_detected(interval: Duration, delta: Duration) -> bool {
    delta > interval.saturating_mul(3)
}

fn spawn_shutdown_signal_task(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(err) = wait_for_shutdown_signal(cancel).await {
            warn!(%err, "failed to install shutdown signal handler");
        }
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal(cancel: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = sigterm.recv() => {
            info!("received SIGTERM, initiating graceful shutdown");
            cancel.cancel();
        }
        _ = sigint.recv() => {
            info!("received SIGINT, initiating graceful shutdown");
            cancel.cancel();
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal(cancel: CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to install Ctrl-C handler")?;
            info!("received Ctrl-C, initiating graceful shutdown");
            cancel.cancel();
        }
    }
    Ok(())
}

/// `install/uninstall/start/stop` — delegate to the platform service
/// manager and surface its error verbatim (spec §4.1).
pub async fn install() -> Result<()> {
    platform_service_manager(current_binary()?).install().await
}

pub async fn uninstall() -> Result<()> {
    platform_service_manager(current_binary()?).uninstall().await
}

pub async fn start() -> Result<()> {
    platform_service_manager(current_binary()?).start().await
}

pub async fn stop() -> Result<()> {
    platform_service_manager(current_binary()?).stop().await
}

fn current_binary() -> Result<PathBuf> {
    std::env::current_exe().context("failed to resolve current executable path")
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
