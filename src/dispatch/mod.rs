//! 出站派发
//!
//! 入口只负责入队；派发器按 FIFO 逐个处理，结果异步回写到日志存储。

mod dispatcher;
mod job;
mod payload;
mod policy;
mod queue;
mod reporter;

pub use dispatcher::Dispatcher;
pub use job::{
    DeliveryOutcome, ItemReport, Job, JobReport, MediaItem, MediaPayload, MimeClass, SendMode,
};
pub use payload::{decode_inline, PayloadLoader};
pub use policy::{media_options, RetryPolicy};
pub use queue::JobQueue;
pub use reporter::StatusReporter;
