use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use worklog_core::{
    AppConfig, CompletionReport, DispatchMessage, DispatchResult, FailureKind, HeartbeatReport,
    LivenessConfig, ReportedOutcome, TaskId, TaskSummary, TaskType, WorkerChannel, WorkerId,
    WorkerRegistration, WorkerStatus, WorkerSummary,
};

use crate::liveness::{LivenessMonitor, LivenessService};
use crate::registry::{Registration, WorkerCounts, WorkerRegistry};
use crate::result_store::{TaskCounts, TaskResultStore};
use crate::strategies::{LeastLoadedStrategy, SelectionStrategy};
use crate::task_dispatcher::TaskDispatcher;

/// 管理器状态快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub workers: WorkerCounts,
    pub tasks: TaskCounts,
}

/// Worker任务分发管理器
///
/// 对外的唯一入口：Worker注册与心跳、任务分发、结果查询和存活巡检都经由这里。
pub struct DispatchManager {
    registry: Arc<WorkerRegistry>,
    results: Arc<TaskResultStore>,
    dispatcher: TaskDispatcher,
    monitor: Arc<LivenessMonitor>,
    liveness: LivenessConfig,
}

impl DispatchManager {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_strategy(config, Arc::new(LeastLoadedStrategy::new()))
    }

    pub fn with_strategy(config: &AppConfig, strategy: Arc<dyn SelectionStrategy>) -> Self {
        let registry = Arc::new(WorkerRegistry::new());
        let results = Arc::new(TaskResultStore::new(config.results.clone()));
        let dispatcher = TaskDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&results),
            strategy,
            config.liveness.liveness_window(),
        );
        let monitor = Arc::new(LivenessMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&results),
            config.liveness.clone(),
        ));

        info!(
            "创建任务分发管理器 (策略: {}, 存活窗口: {}秒, 驱逐窗口: {}秒)",
            dispatcher.strategy_name(),
            config.liveness.liveness_window_seconds,
            config.liveness.eviction_window_seconds
        );

        Self {
            registry,
            results,
            dispatcher,
            monitor,
            liveness: config.liveness.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn results(&self) -> &Arc<TaskResultStore> {
        &self.results
    }

    pub fn monitor(&self) -> Arc<LivenessMonitor> {
        Arc::clone(&self.monitor)
    }

    /// 注册Worker，返回分配的ID
    pub async fn register_worker(
        &self,
        registration: WorkerRegistration,
        channel: Arc<dyn WorkerChannel>,
    ) -> DispatchResult<WorkerId> {
        Ok(self.register_connection(registration, channel).await?.worker_id)
    }

    pub(crate) async fn register_connection(
        &self,
        registration: WorkerRegistration,
        channel: Arc<dyn WorkerChannel>,
    ) -> DispatchResult<Registration> {
        let now = Utc::now();
        let name = registration.name.clone();
        let outcome = self.registry.register(registration, channel, now).await?;

        if !outcome.displaced_tasks.is_empty() {
            warn!(
                "Worker {} 重新注册，{} 个未完成任务标记为失败",
                outcome.worker_id,
                outcome.displaced_tasks.len()
            );
            let reason = format!("Worker {} 已重新注册", outcome.worker_id);
            self.fail_tasks(
                &outcome.displaced_tasks,
                FailureKind::WorkerRestarted,
                &reason,
            )
            .await;
        }

        if self.liveness.registration_counts_as_heartbeat {
            self.registry
                .record_heartbeat(&outcome.worker_id, now, None)
                .await?;
        }

        info!("Worker注册成功: {} ({})", outcome.worker_id, name);
        Ok(outcome)
    }

    /// 主动注销Worker，未完成的任务标记为失败
    pub async fn unregister_worker(&self, worker_id: &str) -> DispatchResult<()> {
        let evicted = self.registry.unregister(worker_id, Utc::now()).await?;

        if let Err(e) = evicted.channel.send(DispatchMessage::Shutdown {
            reason: "Worker已注销".to_string(),
        }) {
            debug!("通知Worker {} 注销失败: {}", worker_id, e);
        }

        let reason = format!("Worker {worker_id} 已注销");
        self.fail_tasks(&evicted.tasks, FailureKind::WorkerUnregistered, &reason)
            .await;

        info!(
            "Worker已注销: {} (未完成任务: {})",
            worker_id,
            evicted.tasks.len()
        );
        Ok(())
    }

    /// 可用或忙碌的Worker，按ID排序
    pub async fn list_active_workers(&self) -> Vec<WorkerSummary> {
        self.registry
            .list_active()
            .await
            .iter()
            .map(|worker| worker.summary())
            .collect()
    }

    pub async fn get_worker(&self, worker_id: &str) -> Option<WorkerSummary> {
        self.registry
            .get(worker_id)
            .await
            .map(|worker| worker.summary())
    }

    /// 分发任务到一个具备能力的可用Worker
    pub async fn queue_task(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
    ) -> DispatchResult<TaskId> {
        self.dispatcher.dispatch(task_type, payload).await
    }

    pub async fn get_task_result(&self, task_id: TaskId) -> Option<TaskSummary> {
        self.results.get(task_id).await.map(|record| record.summary())
    }

    /// 记录心跳，时间以管理器收到心跳的时刻为准
    pub async fn record_heartbeat(
        &self,
        worker_id: &str,
        report: HeartbeatReport,
    ) -> DispatchResult<WorkerStatus> {
        self.registry
            .record_heartbeat(worker_id, Utc::now(), report.load)
            .await
    }

    /// Worker确认开始执行任务
    pub async fn report_task_started(
        &self,
        worker_id: &str,
        task_id: TaskId,
    ) -> DispatchResult<bool> {
        let Some(record) = self.results.get(task_id).await else {
            warn!("Worker {} 上报了未知任务 {} 的开始", worker_id, task_id);
            return Ok(false);
        };
        if record.assigned_worker_id != worker_id {
            warn!(
                "忽略Worker {} 对任务 {} 的开始上报，任务分配给了 {}",
                worker_id, task_id, record.assigned_worker_id
            );
            return Ok(false);
        }

        let started = self.results.mark_running(task_id, Utc::now()).await?;
        if started {
            debug!("任务 {} 开始执行 (Worker: {})", task_id, worker_id);
        }
        Ok(started)
    }

    /// Worker上报任务结果，重复上报不会覆盖已记录的结果
    pub async fn report_task_completion(
        &self,
        worker_id: &str,
        report: CompletionReport,
    ) -> DispatchResult<bool> {
        let task_id = report.task_id;
        let Some(record) = self.results.get(task_id).await else {
            warn!("Worker {} 上报了未知任务 {} 的结果", worker_id, task_id);
            return Ok(false);
        };
        if record.assigned_worker_id != worker_id {
            warn!(
                "忽略Worker {} 对任务 {} 的结果上报，任务分配给了 {}",
                worker_id, task_id, record.assigned_worker_id
            );
            return Ok(false);
        }

        let now = Utc::now();
        let (recorded, succeeded) = match report.outcome {
            ReportedOutcome::Success { result } => {
                (self.results.complete(task_id, result, now).await?, true)
            }
            ReportedOutcome::Failure { error } => (
                self.results
                    .fail(task_id, FailureKind::Reported, error, now)
                    .await?,
                false,
            ),
        };

        if !recorded {
            debug!("任务 {} 已处于终态，忽略重复的结果上报", task_id);
            return Ok(false);
        }

        self.registry
            .finish_task(worker_id, task_id, succeeded, now)
            .await;

        let outcome = if succeeded {
            "succeeded"
        } else {
            FailureKind::Reported.as_str()
        };
        counter!("worklog_tasks_finished_total", "outcome" => outcome).increment(1);
        info!(
            task_id = %task_id,
            worker_id = %worker_id,
            outcome = outcome,
            "任务执行结束"
        );
        Ok(true)
    }

    /// 连接断开，Worker进入失联状态，等待重连或驱逐
    pub async fn handle_disconnect(&self, worker_id: &str, connection_id: Uuid) -> bool {
        let changed = self
            .registry
            .mark_disconnected(worker_id, connection_id, Utc::now())
            .await;
        if changed {
            warn!("Worker {} 连接断开，标记为失联", worker_id);
        }
        changed
    }

    /// 启动后台存活巡检
    pub fn spawn_monitor(&self, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let monitor = Arc::clone(&self.monitor);
        tokio::spawn(async move {
            if let Err(e) = monitor.run(shutdown_rx).await {
                error!("Worker存活检测循环异常退出: {}", e);
            }
        })
    }

    pub async fn stats(&self) -> ManagerStats {
        ManagerStats {
            workers: self.registry.counts().await,
            tasks: self.results.counts().await,
        }
    }

    async fn fail_tasks(&self, tasks: &[TaskId], kind: FailureKind, reason: &str) {
        let now = Utc::now();
        for task_id in tasks {
            match self
                .results
                .fail(*task_id, kind, reason.to_string(), now)
                .await
            {
                Ok(true) => {
                    counter!("worklog_tasks_finished_total", "outcome" => kind.as_str())
                        .increment(1);
                }
                Ok(false) => {}
                Err(e) => warn!("标记任务 {} 失败时出错: {}", task_id, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mocks::{registration, RecordingChannel};
    use serde_json::json;
    use worklog_core::{Capability, DispatchError, TaskStatus};

    fn manager() -> DispatchManager {
        DispatchManager::new(&AppConfig::default())
    }

    #[tokio::test]
    async fn test_register_counts_as_heartbeat() {
        let manager = manager();
        let worker_id = manager
            .register_worker(
                registration("w1", &[Capability::InsightGeneration]),
                RecordingChannel::new(),
            )
            .await
            .unwrap();

        let workers = manager.list_active_workers().await;
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].id, worker_id);
        assert_eq!(workers[0].status, WorkerStatus::Available);
    }

    #[tokio::test]
    async fn test_register_waits_for_heartbeat_when_configured() {
        let mut config = AppConfig::default();
        config.liveness.registration_counts_as_heartbeat = false;
        let manager = DispatchManager::new(&config);
        manager
            .register_worker(
                registration("w1", &[Capability::InsightGeneration]),
                RecordingChannel::new(),
            )
            .await
            .unwrap();

        assert!(manager.list_active_workers().await.is_empty());
        assert!(matches!(
            manager
                .queue_task(TaskType::InsightGeneration, json!({}))
                .await,
            Err(DispatchError::NoCapableWorker { .. })
        ));

        let status = manager
            .record_heartbeat("w1", HeartbeatReport::default())
            .await
            .unwrap();
        assert_eq!(status, WorkerStatus::Available);
    }

    #[tokio::test]
    async fn test_completion_from_other_worker_ignored() {
        let manager = manager();
        manager
            .register_worker(
                registration("w1", &[Capability::InsightGeneration]),
                RecordingChannel::new(),
            )
            .await
            .unwrap();
        let task_id = manager
            .queue_task(TaskType::InsightGeneration, json!({}))
            .await
            .unwrap();

        let recorded = manager
            .report_task_completion("intruder", CompletionReport::success(task_id, json!(1)))
            .await
            .unwrap();
        assert!(!recorded);
        assert_eq!(
            manager.get_task_result(task_id).await.unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_unknown_task_report_is_not_an_error() {
        let manager = manager();
        let task_id = Uuid::new_v4();
        assert!(!manager.report_task_started("w1", task_id).await.unwrap());
        assert!(!manager
            .report_task_completion("w1", CompletionReport::failure(task_id, "boom"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_failure_report_updates_stats() {
        let manager = manager();
        manager
            .register_worker(
                registration("w1", &[Capability::WeeklyReport]),
                RecordingChannel::new(),
            )
            .await
            .unwrap();
        let task_id = manager
            .queue_task(TaskType::WeeklyReport, json!({"week": 12}))
            .await
            .unwrap();

        assert!(manager
            .report_task_completion("w1", CompletionReport::failure(task_id, "no data"))
            .await
            .unwrap());

        let summary = manager.get_task_result(task_id).await.unwrap();
        assert_eq!(summary.status, TaskStatus::Failed);
        assert_eq!(summary.error.as_deref(), Some("no data"));
        assert_eq!(summary.failure_kind, Some(FailureKind::Reported));

        let worker = manager.get_worker("w1").await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Available);
        assert_eq!(worker.stats.tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_transmit_failure_then_heartbeat_recovers() {
        let manager = manager();
        let channel = RecordingChannel::new();
        manager
            .register_worker(
                registration("w1", &[Capability::InsightGeneration]),
                channel.clone(),
            )
            .await
            .unwrap();

        channel.set_failing(true);
        let task_id = match manager
            .queue_task(TaskType::InsightGeneration, json!({"n": 1}))
            .await
        {
            Err(DispatchError::TransmitFailed { task_id, .. }) => task_id,
            other => panic!("unexpected result: {other:?}"),
        };
        let summary = manager.get_task_result(task_id).await.unwrap();
        assert_eq!(summary.status, TaskStatus::Failed);
        assert_eq!(summary.failure_kind, Some(FailureKind::Dispatch));
        assert_eq!(
            manager.get_worker("w1").await.unwrap().status,
            WorkerStatus::Unreachable
        );

        channel.set_failing(false);
        manager
            .record_heartbeat("w1", HeartbeatReport::default())
            .await
            .unwrap();
        let task_id = manager
            .queue_task(TaskType::InsightGeneration, json!({"n": 2}))
            .await
            .unwrap();
        assert_eq!(channel.sent().len(), 1);
        assert_eq!(
            manager.get_task_result(task_id).await.unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let manager = manager();
        manager
            .register_worker(
                registration("w1", &[Capability::InsightGeneration]),
                RecordingChannel::new(),
            )
            .await
            .unwrap();
        manager
            .queue_task(TaskType::InsightGeneration, json!({}))
            .await
            .unwrap();

        let stats = manager.stats().await;
        assert_eq!(stats.workers.busy, 1);
        assert_eq!(stats.tasks.pending, 1);
    }
}
