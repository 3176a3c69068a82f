#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tokio::sync::mpsc;
    use worklog_core::{
        AppConfig, Capability, CompletionReport, DispatchError, DispatchMessage, FailureKind,
        HeartbeatReport, TaskStatus, TaskType, WorkerRegistration, WorkerStatus,
    };
    use worklog_dispatcher::{DispatchManager, MpscWorkerChannel};

    fn manager() -> DispatchManager {
        DispatchManager::new(&AppConfig::default())
    }

    async fn register(manager: &DispatchManager, id: &str) -> mpsc::Receiver<DispatchMessage> {
        let (channel, outbound) = MpscWorkerChannel::pair(8);
        manager
            .register_worker(
                WorkerRegistration::new(id, [Capability::InsightGeneration].into_iter().collect())
                    .with_id(id),
                channel,
            )
            .await
            .unwrap();
        outbound
    }

    #[tokio::test]
    async fn test_silent_worker_becomes_unreachable_then_evicted() {
        let manager = manager();
        let _outbound = register(&manager, "w1").await;
        let task_id = manager
            .queue_task(TaskType::InsightGeneration, json!({}))
            .await
            .unwrap();
        let monitor = manager.monitor();
        let start = Utc::now();

        let report = monitor.sweep_at(start + Duration::seconds(10)).await;
        assert!(report.unreachable.is_empty());

        let report = monitor.sweep_at(start + Duration::seconds(40)).await;
        assert_eq!(report.unreachable, vec!["w1".to_string()]);
        assert!(manager.list_active_workers().await.is_empty());
        assert_eq!(
            manager.get_task_result(task_id).await.unwrap().status,
            TaskStatus::Pending
        );

        let report = monitor.sweep_at(start + Duration::seconds(100)).await;
        assert!(report.evicted.is_empty());

        let report = monitor.sweep_at(start + Duration::seconds(200)).await;
        assert_eq!(report.evicted, vec!["w1".to_string()]);
        assert_eq!(report.failed_tasks, vec![task_id]);

        let summary = manager.get_task_result(task_id).await.unwrap();
        assert_eq!(summary.status, TaskStatus::Failed);
        assert_eq!(summary.failure_kind, Some(FailureKind::LivenessTimeout));
        assert_eq!(
            manager.get_worker("w1").await.unwrap().status,
            WorkerStatus::Evicted
        );

        let heartbeat = manager
            .record_heartbeat("w1", HeartbeatReport::default())
            .await;
        assert!(matches!(heartbeat, Err(DispatchError::WorkerEvicted { .. })));
    }

    #[tokio::test]
    async fn test_heartbeat_between_windows_cancels_eviction() {
        let manager = manager();
        let _outbound = register(&manager, "w1").await;
        let task_id = manager
            .queue_task(TaskType::InsightGeneration, json!({}))
            .await
            .unwrap();
        let monitor = manager.monitor();

        let report = monitor.sweep_at(Utc::now() + Duration::seconds(31)).await;
        assert_eq!(report.unreachable.len(), 1);

        let status = manager
            .record_heartbeat("w1", HeartbeatReport::default())
            .await
            .unwrap();
        assert_eq!(status, WorkerStatus::Busy);

        let report = monitor.sweep_at(Utc::now() + Duration::seconds(20)).await;
        assert!(report.is_empty());

        manager
            .report_task_completion("w1", CompletionReport::success(task_id, json!(1)))
            .await
            .unwrap();
        assert_eq!(
            manager.get_worker("w1").await.unwrap().status,
            WorkerStatus::Available
        );
    }

    #[tokio::test]
    async fn test_unreachable_worker_not_selected() {
        let manager = manager();
        let _outbound = register(&manager, "w1").await;
        manager
            .monitor()
            .sweep_at(Utc::now() + Duration::seconds(31))
            .await;

        let result = manager
            .queue_task(TaskType::InsightGeneration, json!({}))
            .await;
        assert!(matches!(result, Err(DispatchError::NoCapableWorker { .. })));
    }

    #[tokio::test]
    async fn test_evicted_records_and_old_results_purged() {
        let mut config = AppConfig::default();
        config.results.retention_seconds = 60;
        let manager = DispatchManager::new(&config);
        let _outbound = register(&manager, "w1").await;
        let task_id = manager
            .queue_task(TaskType::InsightGeneration, json!({}))
            .await
            .unwrap();
        manager
            .report_task_completion("w1", CompletionReport::success(task_id, json!(1)))
            .await
            .unwrap();
        manager.unregister_worker("w1").await.unwrap();

        let monitor = manager.monitor();
        let report = monitor.sweep_at(Utc::now() + Duration::seconds(30)).await;
        assert_eq!(report.purged_results, 0);
        assert!(manager.get_task_result(task_id).await.is_some());

        let report = monitor.sweep_at(Utc::now() + Duration::seconds(700)).await;
        assert_eq!(report.purged_results, 1);
        assert_eq!(report.purged_workers, 1);
        assert!(manager.get_task_result(task_id).await.is_none());
        assert!(manager.get_worker("w1").await.is_none());
    }
}
