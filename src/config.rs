//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CAREBEE__*` 覆盖（双下划线表示嵌套，如 `CAREBEE__DISPATCH__MAX_ATTEMPTS=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub transport: TransportSection,
    pub store: StoreSection,
    pub dispatch: DispatchSection,
    pub watchdog: WatchdogSection,
    pub maintenance: MaintenanceSection,
}

/// [server] 段：HTTP 入口监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

/// [transport] 段：消息通道桥接服务
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// 桥接服务根地址（会话由桥接服务维护，本服务只调用）
    pub base_url: String,
    pub access_token: Option<String>,
    /// 单次 HTTP 请求的连接/读取上限（秒）；派发超时由 [dispatch] 控制
    pub request_timeout_secs: u64,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".to_string(),
            access_token: None,
            request_timeout_secs: 15,
        }
    }
}

/// [store] 段：消息日志数据库
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub database_path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/carebee.db"),
        }
    }
}

/// [dispatch] 段：重试次数、按媒体类别的超时、退避步长、冷却时间
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub max_attempts: u32,
    pub image_timeout_secs: u64,
    pub video_timeout_secs: u64,
    pub other_timeout_secs: u64,
    /// 第 n 次失败后等待 n * backoff_step_secs
    pub backoff_step_secs: u64,
    pub cooldown_millis: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            image_timeout_secs: 30,
            video_timeout_secs: 300,
            other_timeout_secs: 60,
            backoff_step_secs: 3,
            cooldown_millis: 1000,
        }
    }
}

/// [watchdog] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogSection {
    pub tick_secs: u64,
    /// 需大于最长单次超时（视频）加退避
    pub stuck_threshold_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            stuck_threshold_secs: 360,
            probe_timeout_secs: 10,
        }
    }
}

/// [maintenance] 段：媒体清理窗口、保活与心跳间隔
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceSection {
    pub retention_hours: u64,
    pub redact_interval_secs: u64,
    /// 短时内容类别（如一次性视频），单独走高频清理
    pub ephemeral_category: String,
    pub ephemeral_window_secs: u64,
    pub ephemeral_interval_secs: u64,
    pub keep_alive_secs: u64,
    pub heartbeat_secs: u64,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            retention_hours: 15,
            redact_interval_secs: 3600,
            ephemeral_category: "ephemeral_video".to_string(),
            ephemeral_window_secs: 300,
            ephemeral_interval_secs: 60,
            keep_alive_secs: 300,
            heartbeat_secs: 60,
        }
    }
}

/// 从 config 目录加载配置，环境变量 CAREBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CAREBEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CAREBEE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
