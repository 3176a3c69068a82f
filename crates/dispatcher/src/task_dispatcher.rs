use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::counter;
use tracing::{error, info, warn};
use uuid::Uuid;

use worklog_core::{
    DispatchError, DispatchMessage, DispatchResult, FailureKind, TaskAssignment, TaskId,
    TaskType,
};

use crate::registry::WorkerRegistry;
use crate::result_store::TaskResultStore;
use crate::strategies::SelectionStrategy;

/// 任务分发器
///
/// 选择Worker、创建任务记录都在注册表写锁内完成，发送在释放锁之后进行。
pub struct TaskDispatcher {
    registry: Arc<WorkerRegistry>,
    results: Arc<TaskResultStore>,
    strategy: Arc<dyn SelectionStrategy>,
    liveness_window: Duration,
}

impl TaskDispatcher {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        results: Arc<TaskResultStore>,
        strategy: Arc<dyn SelectionStrategy>,
        liveness_window: Duration,
    ) -> Self {
        Self {
            registry,
            results,
            strategy,
            liveness_window,
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// 分发任务，成功时任务已经发送到Worker的连接
    pub async fn dispatch(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
    ) -> DispatchResult<TaskId> {
        let task_id = Uuid::new_v4();
        let capability = task_type.required_capability();
        let now = Utc::now();

        let reservation = {
            let mut table = self.registry.lock_table().await;
            let Some(reservation) = table.reserve(
                capability,
                self.strategy.as_ref(),
                task_id,
                self.liveness_window,
                now,
            ) else {
                warn!("没有可执行任务类型 {} 的可用Worker，拒绝分发", task_type);
                counter!("worklog_dispatch_rejected_total", "task_type" => task_type.as_str())
                    .increment(1);
                return Err(DispatchError::no_capable_worker(task_type));
            };

            if let Err(e) = self
                .results
                .create(
                    task_id,
                    task_type,
                    payload.clone(),
                    reservation.worker_id.clone(),
                    now,
                )
                .await
            {
                table.cancel_reservation(&reservation.worker_id, task_id, now);
                return Err(e);
            }
            reservation
        };

        let assignment = DispatchMessage::AssignTask(TaskAssignment {
            task_id,
            task_type,
            payload,
        });

        if let Err(e) = reservation.channel.send(assignment) {
            let reason = e.to_string();
            let failed_at = Utc::now();
            warn!(
                "任务 {} 发送到Worker {} 失败: {}",
                task_id, reservation.worker_id, reason
            );

            if let Err(e) = self
                .results
                .fail(
                    task_id,
                    FailureKind::Dispatch,
                    format!("任务发送失败: {reason}"),
                    failed_at,
                )
                .await
            {
                error!("更新任务 {} 状态失败: {}", task_id, e);
            }
            self.registry
                .release_failed_transmit(
                    &reservation.worker_id,
                    reservation.connection_id,
                    task_id,
                    failed_at,
                )
                .await;
            counter!("worklog_tasks_finished_total", "outcome" => FailureKind::Dispatch.as_str())
                .increment(1);

            return Err(DispatchError::TransmitFailed {
                task_id,
                worker_id: reservation.worker_id,
                reason,
            });
        }

        info!(
            task_id = %task_id,
            worker_id = %reservation.worker_id,
            task_type = %task_type,
            "任务已分发"
        );
        counter!("worklog_tasks_queued_total", "task_type" => task_type.as_str())
            .increment(1);

        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::LeastLoadedStrategy;
    use crate::test_utils::mocks::{registration, MockChannel, RecordingChannel};
    use serde_json::json;
    use worklog_core::{Capability, ResultStoreConfig, TaskStatus, WorkerStatus};

    fn dispatcher() -> (TaskDispatcher, Arc<WorkerRegistry>, Arc<TaskResultStore>) {
        let registry = Arc::new(WorkerRegistry::new());
        let results = Arc::new(TaskResultStore::new(ResultStoreConfig::default()));
        let dispatcher = TaskDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&results),
            Arc::new(LeastLoadedStrategy::new()),
            Duration::seconds(30),
        );
        (dispatcher, registry, results)
    }

    async fn add_worker(
        registry: &WorkerRegistry,
        id: &str,
        caps: &[Capability],
        channel: Arc<dyn worklog_core::WorkerChannel>,
    ) {
        let now = Utc::now();
        registry
            .register(registration(id, caps), channel, now)
            .await
            .unwrap();
        registry.record_heartbeat(id, now, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_sends_assignment() {
        let (dispatcher, registry, results) = dispatcher();
        let channel = RecordingChannel::new();
        add_worker(&registry, "w1", &[Capability::InsightGeneration], channel.clone()).await;

        let task_id = dispatcher
            .dispatch(TaskType::InsightGeneration, json!({"user_id": 1}))
            .await
            .unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            DispatchMessage::AssignTask(assignment) => {
                assert_eq!(assignment.task_id, task_id);
                assert_eq!(assignment.task_type, TaskType::InsightGeneration);
                assert_eq!(assignment.payload, json!({"user_id": 1}));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let record = results.get(task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.assigned_worker_id, "w1");
        assert_eq!(registry.get("w1").await.unwrap().status, WorkerStatus::Busy);
    }

    #[tokio::test]
    async fn test_dispatch_without_capable_worker() {
        let (dispatcher, registry, results) = dispatcher();
        add_worker(
            &registry,
            "w1",
            &[Capability::WeeklyReport],
            RecordingChannel::new(),
        )
        .await;

        let result = dispatcher
            .dispatch(TaskType::InsightGeneration, json!({}))
            .await;
        assert_eq!(
            result,
            Err(DispatchError::no_capable_worker(TaskType::InsightGeneration))
        );
        assert!(results.is_empty().await);
    }

    #[tokio::test]
    async fn test_dispatch_transmit_failure() {
        let (dispatcher, registry, results) = dispatcher();
        let mut channel = MockChannel::new();
        channel.expect_is_closed().return_const(false);
        channel
            .expect_send()
            .times(1)
            .returning(|_| Err(DispatchError::ChannelFull));
        add_worker(&registry, "w1", &[Capability::InsightGeneration], Arc::new(channel)).await;

        let err = dispatcher
            .dispatch(TaskType::InsightGeneration, json!({}))
            .await
            .unwrap_err();

        let (task_id, worker_id) = match err {
            DispatchError::TransmitFailed {
                task_id, worker_id, ..
            } => (task_id, worker_id),
            other => panic!("unexpected error: {other:?}"),
        };
        assert_eq!(worker_id, "w1");

        let record = results.get(task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.failure_kind, Some(FailureKind::Dispatch));

        let worker = registry.get("w1").await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Unreachable);
        assert_eq!(worker.active_task_count(), 0);
    }
}
