use std::collections::HashMap;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use worklog_core::{
    DispatchError, DispatchResult, FailureKind, ResultStoreConfig, TaskId, TaskRecord,
    TaskStatus, TaskType, WorkerId,
};

/// 任务状态计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// 任务结果存储
///
/// 记录从分发时创建，保留到进入终态后超过保留期。未进入终态的记录不会被清理。
pub struct TaskResultStore {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
    config: ResultStoreConfig,
}

impl TaskResultStore {
    pub fn new(config: ResultStoreConfig) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub async fn create(
        &self,
        task_id: TaskId,
        task_type: TaskType,
        payload: serde_json::Value,
        worker_id: WorkerId,
        now: DateTime<Utc>,
    ) -> DispatchResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task_id) {
            return Err(DispatchError::Internal(format!("任务ID重复: {task_id}")));
        }
        tasks.insert(
            task_id,
            TaskRecord::new(task_id, task_type, payload, worker_id, now),
        );
        Ok(())
    }

    pub async fn get(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// 返回任务是否从 Pending 进入 Running
    pub async fn mark_running(&self, task_id: TaskId, now: DateTime<Utc>) -> DispatchResult<bool> {
        let mut tasks = self.tasks.write().await;
        let record = tasks
            .get_mut(&task_id)
            .ok_or(DispatchError::TaskNotFound { id: task_id })?;
        Ok(record.mark_running(now))
    }

    /// 返回结果是否被记录，终态任务上的重复上报返回 false
    pub async fn complete(
        &self,
        task_id: TaskId,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        let mut tasks = self.tasks.write().await;
        let record = tasks
            .get_mut(&task_id)
            .ok_or(DispatchError::TaskNotFound { id: task_id })?;
        Ok(record.complete(result, now))
    }

    pub async fn fail(
        &self,
        task_id: TaskId,
        kind: FailureKind,
        message: String,
        now: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        let mut tasks = self.tasks.write().await;
        let record = tasks
            .get_mut(&task_id)
            .ok_or(DispatchError::TaskNotFound { id: task_id })?;
        let changed = record.fail(kind, message, now);
        if changed {
            debug!("任务 {} 标记为失败 ({})", task_id, kind.as_str());
        }
        Ok(changed)
    }

    pub async fn counts(&self) -> TaskCounts {
        let tasks = self.tasks.read().await;
        let mut counts = TaskCounts::default();
        for record in tasks.values() {
            match record.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Succeeded => counts.succeeded += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// 清理超过保留期的终态记录，超出容量时先清理最早完成的终态记录
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let retention = self.config.retention();
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();

        tasks.retain(|_, record| match record.completed_at {
            Some(completed_at) if record.is_terminal() => now - completed_at <= retention,
            _ => true,
        });

        if tasks.len() > self.config.max_entries {
            let mut terminal: Vec<(DateTime<Utc>, TaskId)> = tasks
                .values()
                .filter(|record| record.is_terminal())
                .map(|record| {
                    (
                        record.completed_at.unwrap_or(record.created_at),
                        record.task_id,
                    )
                })
                .collect();
            terminal.sort();

            let excess = tasks.len() - self.config.max_entries;
            for (_, task_id) in terminal.into_iter().take(excess) {
                tasks.remove(&task_id);
            }
        }

        let purged = before - tasks.len();
        if purged > 0 {
            info!("清理了 {} 条过期任务结果", purged);
            counter!("worklog_task_results_purged_total").increment(purged as u64);
        }
        purged
    }
}
