//! carebee - 出站派发服务
//!
//! 入口：加载配置、打开日志存储、连接消息通道，启动派发器 / 看门狗 / 维护任务与 HTTP 入口。
//! 看门狗故障以非零退出码结束进程，由外部监管（systemd、容器编排等）重启。
//!
//! 启动: cargo run -- [config.toml]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use carebee::config::load_config;
use carebee::core::{DispatchState, ShutdownManager};
use carebee::dispatch::{Dispatcher, JobQueue, PayloadLoader, RetryPolicy, StatusReporter};
use carebee::maintenance::{MaintenanceConfig, MaintenanceScheduler};
use carebee::observability;
use carebee::server::{create_router, AppState};
use carebee::store::{LogStore, SqliteLogStore};
use carebee::transport::{HttpTransport, Transport};
use carebee::watchdog::{Watchdog, WatchdogConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load configuration")?;

    // 存储与通道先探测，失败直接退出
    let store = SqliteLogStore::open(&config.store.database_path).with_context(|| {
        format!(
            "Failed to open log store at {}",
            config.store.database_path.display()
        )
    })?;
    store.ping().await.context("Log store is not usable")?;
    let store: Arc<dyn LogStore> = Arc::new(store);

    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(&config.transport).context("Failed to build transport client")?,
    );
    let session = transport
        .session_state()
        .await
        .with_context(|| format!("Transport bridge unreachable at {}", config.transport.base_url))?;
    if !session.ready {
        tracing::warn!(
            pending_challenge = session.has_pending_challenge,
            "Transport session not ready, jobs will be rejected until it is"
        );
    }

    let policy = RetryPolicy::from(&config.dispatch);
    let watchdog_config = WatchdogConfig::from(&config.watchdog);
    if watchdog_config.stuck_threshold <= policy.longest_attempt() {
        tracing::warn!(
            stuck_threshold_secs = watchdog_config.stuck_threshold.as_secs(),
            longest_attempt_secs = policy.longest_attempt().as_secs(),
            "Stuck threshold does not exceed the longest attempt timeout"
        );
    }

    // 远程媒体拉取与桥接共用连接超时
    let media_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.transport.request_timeout_secs))
        .build()
        .context("Failed to build media fetch client")?;

    let queue = Arc::new(JobQueue::new());
    let state = Arc::new(DispatchState::new());
    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let dispatcher = Dispatcher::new(
        Arc::clone(&queue),
        Arc::clone(&state),
        Arc::clone(&transport),
        StatusReporter::new(Arc::clone(&store)),
        policy.clone(),
    )
    .with_cooldown(Duration::from_millis(config.dispatch.cooldown_millis))
    .with_loader(PayloadLoader::new(media_client))
    .with_halt(shutdown.fatal_token());
    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown.token()));

    let watchdog = Watchdog::new(Arc::clone(&state), Arc::clone(&transport), watchdog_config.clone());
    let watchdog_handle = tokio::spawn(watchdog.run(ShutdownManager::clone(&shutdown)));

    let maintenance_handles = MaintenanceScheduler::new(
        Arc::clone(&store),
        Arc::clone(&transport),
        Arc::clone(&queue),
        Arc::clone(&state),
        MaintenanceConfig::from(&config.maintenance),
    )
    .spawn(shutdown.token());

    let app = create_router(Arc::new(AppState::new(
        Arc::clone(&queue),
        Arc::clone(&transport),
        watchdog_config.probe_timeout,
    )));
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    tracing::info!("carebee listening on http://{}", config.server.bind_addr);

    let fatal = shutdown.fatal_token();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.token().cancelled_owned());
    tokio::select! {
        result = server => result.context("HTTP server failed")?,
        _ = fatal.cancelled() => {}
    }

    // 致命故障不排空，立即退出交给外部监管重启
    if fatal.is_cancelled() {
        exit_fatal(&shutdown, &queue);
    }

    // 等派发器做完当前任务；超过卡死阈值就不再等
    tokio::select! {
        drained = tokio::time::timeout(watchdog_config.stuck_threshold, dispatcher_handle) => {
            if drained.is_err() {
                tracing::warn!(pending = queue.depth(), "Dispatcher did not stop in time");
            }
        }
        _ = fatal.cancelled() => exit_fatal(&shutdown, &queue),
    }
    let _ = watchdog_handle.await;
    for handle in maintenance_handles {
        let _ = handle.await;
    }

    let reason = shutdown.reason();
    tracing::info!(?reason, pending = queue.depth(), "carebee stopped");
    if let Some(reason) = reason {
        let code = reason.exit_code();
        if code != 0 {
            std::process::exit(code);
        }
    }
    Ok(())
}

fn exit_fatal(shutdown: &ShutdownManager, queue: &JobQueue) -> ! {
    tracing::error!(
        reason = ?shutdown.reason(),
        pending = queue.depth(),
        "Fatal fault, exiting without draining"
    );
    std::process::exit(1);
}
