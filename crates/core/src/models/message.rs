use serde::{Deserialize, Serialize};

use super::{TaskId, TaskType, WorkerLoad, WorkerRegistration};

/// Worker经通道发给管理器的消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Register(WorkerRegistration),
    Heartbeat(HeartbeatReport),
    TaskStarted { task_id: TaskId },
    TaskCompleted(CompletionReport),
}

/// 心跳上报，Worker身份由所在连接确定
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatReport {
    #[serde(default)]
    pub load: Option<WorkerLoad>,
}

/// 任务完成上报
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionReport {
    pub task_id: TaskId,
    pub outcome: ReportedOutcome,
}

impl CompletionReport {
    pub fn success(task_id: TaskId, result: serde_json::Value) -> Self {
        Self {
            task_id,
            outcome: ReportedOutcome::Success { result },
        }
    }

    pub fn failure<S: Into<String>>(task_id: TaskId, error: S) -> Self {
        Self {
            task_id,
            outcome: ReportedOutcome::Failure {
                error: error.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportedOutcome {
    Success { result: serde_json::Value },
    Failure { error: String },
}

/// 管理器经通道发给Worker的消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchMessage {
    AssignTask(TaskAssignment),
    Shutdown { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
}

impl WorkerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Register(_) => "register",
            WorkerMessage::Heartbeat(_) => "heartbeat",
            WorkerMessage::TaskStarted { .. } => "task_started",
            WorkerMessage::TaskCompleted(_) => "task_completed",
        }
    }
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    pub fn deserialize(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
    pub fn serialize_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
    pub fn deserialize_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl DispatchMessage {
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
    pub fn deserialize(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
    pub fn serialize_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
    pub fn deserialize_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
