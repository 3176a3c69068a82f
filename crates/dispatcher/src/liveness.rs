use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use worklog_core::{
    DispatchMessage, DispatchResult, FailureKind, LivenessConfig, TaskId, WorkerId,
};

use crate::registry::WorkerRegistry;
use crate::result_store::TaskResultStore;

/// 一次存活巡检的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub unreachable: Vec<WorkerId>,
    pub evicted: Vec<WorkerId>,
    pub failed_tasks: Vec<TaskId>,
    pub purged_workers: usize,
    pub purged_results: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.unreachable.is_empty()
            && self.evicted.is_empty()
            && self.failed_tasks.is_empty()
            && self.purged_workers == 0
            && self.purged_results == 0
    }
}

/// Worker存活检测服务接口
#[async_trait]
pub trait LivenessService: Send + Sync {
    /// 以当前时间执行一次巡检
    async fn sweep(&self) -> DispatchResult<SweepReport>;

    /// 按配置的间隔巡检，直到收到停止信号
    async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> DispatchResult<()>;
}

/// Worker存活检测
pub struct LivenessMonitor {
    registry: Arc<WorkerRegistry>,
    results: Arc<TaskResultStore>,
    config: LivenessConfig,
}

impl LivenessMonitor {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        results: Arc<TaskResultStore>,
        config: LivenessConfig,
    ) -> Self {
        Self {
            registry,
            results,
            config,
        }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// 以指定时间执行一次巡检
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        debug!("开始Worker存活巡检");

        let sweep = self.registry.sweep(&self.config, now).await;
        let mut report = SweepReport {
            unreachable: sweep.unreachable,
            purged_workers: sweep.purged.len(),
            ..SweepReport::default()
        };

        if !report.unreachable.is_empty() {
            counter!("worklog_workers_unreachable_total")
                .increment(report.unreachable.len() as u64);
        }

        for evicted in sweep.evicted {
            let reason = format!("Worker {} 心跳超时，已被驱逐", evicted.worker_id);
            if let Err(e) = evicted.channel.send(DispatchMessage::Shutdown {
                reason: reason.clone(),
            }) {
                debug!("通知被驱逐的Worker {} 失败: {}", evicted.worker_id, e);
            }

            for task_id in evicted.tasks {
                match self
                    .results
                    .fail(task_id, FailureKind::LivenessTimeout, reason.clone(), now)
                    .await
                {
                    Ok(true) => {
                        counter!(
                            "worklog_tasks_finished_total",
                            "outcome" => FailureKind::LivenessTimeout.as_str()
                        )
                        .increment(1);
                        report.failed_tasks.push(task_id);
                    }
                    Ok(false) => {}
                    Err(e) => warn!("标记任务 {} 失败时出错: {}", task_id, e),
                }
            }

            counter!("worklog_workers_evicted_total").increment(1);
            report.evicted.push(evicted.worker_id);
        }

        report.purged_results = self.results.purge_expired(now).await;

        let counts = self.registry.counts().await;
        gauge!("worklog_active_workers").set((counts.available + counts.busy) as f64);

        if !report.evicted.is_empty() {
            info!(
                "驱逐了 {} 个Worker，{} 个任务标记为失败",
                report.evicted.len(),
                report.failed_tasks.len()
            );
        }
        report
    }
}

#[async_trait]
impl LivenessService for LivenessMonitor {
    async fn sweep(&self) -> DispatchResult<SweepReport> {
        Ok(self.sweep_at(Utc::now()).await)
    }

    async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> DispatchResult<()> {
        info!(
            "启动Worker存活检测循环 (间隔: {}秒)",
            self.config.sweep_interval_seconds
        );

        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) => {
                            if !report.is_empty() {
                                debug!("存活巡检结果: {:?}", report);
                            }
                        }
                        Err(e) => error!("Worker存活巡检时出错: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到停止信号，退出Worker存活检测循环");
                    break;
                }
            }
        }

        Ok(())
    }
}
