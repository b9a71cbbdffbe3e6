//! 核心层：错误分类、共享派发状态、关闭与故障升级

pub mod error;
pub mod shutdown;
pub mod state;

pub use error::{DispatchError, WatchdogFault};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{DispatchSnapshot, DispatchState, DispatcherPhase};
