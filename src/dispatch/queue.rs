//! 派发队列（内存，严格 FIFO，无界）
//!
//! 任务在派发完成之前一直留在队首：派发器先 peek_oldest 执行，结束后再 dequeue_oldest。
//! 只有派发器会出队，所以两次调用之间队首不会变化。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use super::Job;

#[derive(Debug, Default)]
pub struct JobQueue {
    pending: Mutex<VecDeque<Arc<Job>>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队到队尾，不阻塞；返回入队后的深度
    pub fn enqueue(&self, job: Job) -> usize {
        let depth = {
            let mut pending = self.lock();
            pending.push_back(Arc::new(job));
            pending.len()
        };
        self.notify.notify_one();
        depth
    }

    /// 查看队首（不移除）
    pub fn peek_oldest(&self) -> Option<Arc<Job>> {
        self.lock().front().cloned()
    }

    /// 移除并返回队首
    pub fn dequeue_oldest(&self) -> Option<Arc<Job>> {
        self.lock().pop_front()
    }

    /// 待处理数量（含正在派发的任务）
    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// 等待新任务入队；入队发生在等待之前时立即返回
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Arc<Job>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
