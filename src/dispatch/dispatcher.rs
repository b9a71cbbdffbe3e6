//! 串行派发器
//!
//! 状态机：Idle -> Processing（队列非空）-> Cooldown（任务结束）-> Idle（冷却后）。
//! 同一时刻只有一个任务在派发：通道是单会话、单写者，并发发送会打乱顺序。
//! 优雅关闭只在任务之间生效，进行中的任务会做完；
//! 致命故障（halt）则立即中止当前投递，不再发出任何请求。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::policy::media_options;
use super::{
    DeliveryOutcome, ItemReport, Job, JobQueue, JobReport, MimeClass, PayloadLoader,
    RetryPolicy, StatusReporter,
};
use crate::core::{DispatchError, DispatchState};
use crate::transport::{chunk_text, Transport};

pub struct Dispatcher {
    queue: Arc<JobQueue>,
    state: Arc<DispatchState>,
    transport: Arc<dyn Transport>,
    reporter: StatusReporter,
    loader: PayloadLoader,
    policy: RetryPolicy,
    cooldown: Duration,
    halt: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<JobQueue>,
        state: Arc<DispatchState>,
        transport: Arc<dyn Transport>,
        reporter: StatusReporter,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            state,
            transport,
            reporter,
            loader: PayloadLoader::default(),
            policy,
            cooldown: Duration::from_secs(1),
            halt: CancellationToken::new(),
        }
    }

    /// 致命故障信号；取消后正在进行的投递被丢弃
    pub fn with_halt(mut self, halt: CancellationToken) -> Self {
        self.halt = halt;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_loader(mut self, loader: PayloadLoader) -> Self {
        self.loader = loader;
        self
    }

    /// 主循环：收到关闭信号后在任务之间退出；halt 时立即退出
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(cooldown_ms = self.cooldown.as_millis() as u64, "Dispatcher started");
        loop {
            if shutdown.is_cancelled() || self.halt.is_cancelled() {
                break;
            }
            let processed = tokio::select! {
                biased;
                _ = self.halt.cancelled() => {
                    tracing::error!(
                        active_job = ?self.state.snapshot().active_job,
                        "Dispatcher halted, abandoning active job"
                    );
                    break;
                }
                report = self.process_next() => report.is_some(),
            };
            if !processed {
                tokio::select! {
                    _ = self.queue.notified() => {}
                    _ = shutdown.cancelled() => break,
                    _ = self.halt.cancelled() => break,
                }
            }
        }
        tracing::info!(pending = self.queue.depth(), "Dispatcher stopped");
    }

    /// 处理队首任务一轮（含冷却）；队列为空时返回 None
    pub async fn process_next(&self) -> Option<JobReport> {
        let job = self.queue.peek_oldest()?;
        if !self.state.begin_processing(job.id) {
            tracing::warn!(job_id = job.id, "Dispatcher already processing, skipping");
            return None;
        }

        tracing::info!(
            job_id = job.id,
            media = job.media_items.len(),
            queue_depth = self.queue.depth(),
            "Processing job"
        );
        let report = self.send_job(&job).await;

        // 派发结束后才出队
        self.queue.dequeue_oldest();
        self.state.enter_cooldown();

        match &report.error {
            None => tracing::info!(job_id = job.id, "Job delivered"),
            Some(e) => tracing::error!(job_id = job.id, error = %e, "Job failed"),
        }
        self.reporter.report(job.id, report.outcome);

        tokio::time::sleep(self.cooldown).await;
        self.state.enter_idle();
        Some(report)
    }

    /// 派发一个任务
    ///
    /// 有媒体时按顺序发送，文本作为最后一项的说明文字；没有媒体时单独发文本。
    /// 超过通道上限的文本按段发送，每段独立计重试，重试只重发失败的那一段。
    /// 任何一项无法恢复即中止，剩余项与文本都不再尝试。
    pub async fn send_job(&self, job: &Job) -> JobReport {
        let text = job.message_text();
        let mut items = Vec::with_capacity(job.media_items.len().max(1));

        if job.media_items.is_empty() {
            let Some(text) = text else {
                return JobReport {
                    job_id: job.id,
                    outcome: DeliveryOutcome::Failed,
                    items,
                    error: Some(DispatchError::MediaEncoding(
                        "job has neither text nor media".to_string(),
                    )),
                };
            };

            let transport = self.transport.as_ref();
            let recipient = job.recipient.as_str();
            let chunks = chunk_text(text, transport.max_text_chars());
            for (index, chunk) in chunks.iter().enumerate() {
                let label = format!("text[{}]", index);
                let chunk = chunk.as_str();
                let (item, result) = self
                    .policy
                    .run(&label, self.policy.text_timeout(), false, move |_, _| {
                        transport.send_text(recipient, chunk)
                    })
                    .await;
                items.push(item);
                if let Err(e) = result {
                    return finish(job.id, items, Some(e));
                }
            }
            return finish(job.id, items, None);
        }

        let last = job.media_items.len() - 1;
        for (index, media) in job.media_items.iter().enumerate() {
            let caption = if index == last { text } else { None };
            let label = format!("media[{}]", index);
            let degradable = media.mime_class == MimeClass::Video;
            let timeout = self.policy.timeout_for(media.mime_class);

            let (item, result) = self
                .policy
                .run(&label, timeout, degradable, move |_, mode| {
                    let options = media_options(media.mime_class, mode, job.mute, caption);
                    async move {
                        let upload = self.loader.load(media).await?;
                        self.transport
                            .send_media(&job.recipient, upload, &options)
                            .await
                    }
                })
                .await;
            items.push(item);

            if let Err(e) = result {
                return finish(job.id, items, Some(e));
            }
        }

        finish(job.id, items, None)
    }
}

fn finish(job_id: i64, items: Vec<ItemReport>, error: Option<DispatchError>) -> JobReport {
    JobReport {
        job_id,
        outcome: if error.is_none() {
            DeliveryOutcome::Sent
        } else {
            DeliveryOutcome::Failed
        },
        items,
        error,
    }
}
