use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{TaskType, WorkerId};

pub type TaskId = Uuid;

/// 任务状态
///
/// 只能向前推进：`Pending → Running → Succeeded | Failed`。
/// 分发失败或Worker失联时，`Pending` 可以直接进入 `Failed`。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// 任务失败原因
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worker上报执行失败
    Reported,
    /// 发送到Worker的通道失败
    Dispatch,
    /// Worker心跳超时被驱逐
    LivenessTimeout,
    /// Worker主动注销
    WorkerUnregistered,
    /// Worker重新注册，旧连接上的任务丢失
    WorkerRestarted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Reported => "reported",
            FailureKind::Dispatch => "dispatch",
            FailureKind::LivenessTimeout => "liveness_timeout",
            FailureKind::WorkerUnregistered => "worker_unregistered",
            FailureKind::WorkerRestarted => "worker_restarted",
        }
    }
}

/// 任务记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub assigned_worker_id: WorkerId,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
}

impl TaskRecord {
    pub fn new(
        task_id: TaskId,
        task_type: TaskType,
        payload: serde_json::Value,
        assigned_worker_id: WorkerId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            task_type,
            payload,
            assigned_worker_id,
            status: TaskStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error_message: None,
            failure_kind: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Worker确认开始执行，只有 Pending 状态会生效
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        true
    }

    /// 记录成功结果，终态任务不受影响
    pub fn complete(&mut self, result: serde_json::Value, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        // 未收到开始确认时视为隐式经过 Running
        self.started_at.get_or_insert(now);
        self.status = TaskStatus::Succeeded;
        self.result = Some(result);
        self.completed_at = Some(now);
        true
    }

    /// 记录失败原因，终态任务不受影响
    pub fn fail(&mut self, kind: FailureKind, message: String, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Failed;
        self.error_message = Some(message);
        self.failure_kind = Some(kind);
        self.completed_at = Some(now);
        true
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.task_id,
            worker_id: self.assigned_worker_id.clone(),
            task_type: self.task_type,
            status: self.status,
            result: self.result.clone(),
            error: self.error_message.clone(),
            failure_kind: self.failure_kind,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// 提供给HTTP层轮询的任务快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending() -> TaskRecord {
        TaskRecord::new(
            Uuid::new_v4(),
            TaskType::InsightGeneration,
            json!({"user_id": 7}),
            "w-1".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn test_forward_only_lifecycle() {
        let mut task = pending();
        let now = Utc::now();
        assert!(task.mark_running(now));
        assert!(!task.mark_running(now));
        assert!(task.complete(json!({"insights": []}), now));
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert!(!task.mark_running(now));
    }

    #[test]
    fn test_terminal_task_ignores_second_report() {
        let mut task = pending();
        let first = Utc::now();
        assert!(task.complete(json!({"n": 1}), first));

        let later = first + chrono::Duration::seconds(10);
        assert!(!task.complete(json!({"n": 2}), later));
        assert!(!task.fail(FailureKind::Reported, "boom".into(), later));

        assert_eq!(task.result, Some(json!({"n": 1})));
        assert_eq!(task.completed_at, Some(first));
        assert!(task.error_message.is_none());
    }

    #[test]
    fn test_complete_without_start_sets_started_at() {
        let mut task = pending();
        let now = Utc::now();
        task.complete(json!(null), now);
        assert_eq!(task.started_at, Some(now));
    }

    #[test]
    fn test_fail_from_pending_keeps_started_at_empty() {
        let mut task = pending();
        assert!(task.fail(FailureKind::Dispatch, "通道已关闭".into(), Utc::now()));
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure_kind, Some(FailureKind::Dispatch));
        assert!(task.started_at.is_none());
        assert!(task.result.is_none());
    }
}
