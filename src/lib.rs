//! carebee - 养老院家属通知的出站派发引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、共享派发状态、关闭/故障升级
//! - **dispatch**: 任务队列、串行派发器、重试降级策略、状态回写
//! - **transport**: 消息通道抽象（HTTP 桥接实现 + 测试用 Mock）
//! - **store**: 消息日志持久化（SQLite）
//! - **watchdog**: 卡死检测与通道存活探测
//! - **maintenance**: 周期任务（媒体清理、保活、心跳日志）
//! - **server**: HTTP 入口（派发、状态、存活）

pub mod config;
pub mod core;
pub mod dispatch;
pub mod maintenance;
pub mod observability;
#[cfg(feature = "server")]
pub mod server;
pub mod store;
pub mod transport;
pub mod watchdog;
