use thiserror::Error;

use crate::models::{TaskId, TaskType, WorkerStatus};

/// 任务分发错误类型定义
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("没有可执行任务类型 {task_type} 的可用Worker")]
    NoCapableWorker { task_type: TaskType },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("Worker已被驱逐: {id}")]
    WorkerEvicted { id: String },

    #[error("Worker {id} 已在新连接上重新注册")]
    ConnectionSuperseded { id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: TaskId },

    #[error("Worker状态迁移无效: {id} {from:?} -> {to:?}")]
    InvalidTransition {
        id: String,
        from: WorkerStatus,
        to: WorkerStatus,
    },

    #[error("Worker注册信息无效: {0}")]
    InvalidRegistration(String),

    #[error("不支持的任务类型: {0}")]
    UnsupportedTaskType(String),

    #[error("Worker通道已关闭")]
    ChannelClosed,

    #[error("Worker通道已满")]
    ChannelFull,

    #[error("任务 {task_id} 发送到Worker {worker_id} 失败: {reason}")]
    TransmitFailed {
        task_id: TaskId,
        worker_id: String,
        reason: String,
    },

    #[error("收到非预期的消息: {0}")]
    UnexpectedMessage(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

impl DispatchError {
    pub fn no_capable_worker(task_type: TaskType) -> Self {
        Self::NoCapableWorker { task_type }
    }

    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }

    pub fn worker_evicted<S: Into<String>>(id: S) -> Self {
        Self::WorkerEvicted { id: id.into() }
    }

    pub fn connection_superseded<S: Into<String>>(id: S) -> Self {
        Self::ConnectionSuperseded { id: id.into() }
    }

    pub fn invalid_registration<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRegistration(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 调用方重新提交是否可能成功
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::NoCapableWorker { .. }
                | DispatchError::ChannelClosed
                | DispatchError::ChannelFull
                | DispatchError::TransmitFailed { .. }
        )
    }

    /// 面向最终用户的提示信息
    pub fn user_message(&self) -> &str {
        match self {
            DispatchError::NoCapableWorker { .. } => "当前没有可处理该任务的Worker，请稍后重试",
            DispatchError::TransmitFailed { .. } => "任务分发失败，请重新提交",
            DispatchError::TaskNotFound { .. } => "请求的任务不存在或已过期",
            DispatchError::WorkerNotFound { .. } | DispatchError::WorkerEvicted { .. } => {
                "请求的Worker节点不存在"
            }
            DispatchError::UnsupportedTaskType(_) => "不支持的任务类型",
            DispatchError::InvalidRegistration(_) => "Worker注册信息有误",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(DispatchError::no_capable_worker(TaskType::WeeklyReport).is_retryable());
        assert!(DispatchError::ChannelClosed.is_retryable());
        assert!(!DispatchError::worker_not_found("w-1").is_retryable());
        assert!(!DispatchError::UnsupportedTaskType("x".into()).is_retryable());
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let converted: DispatchError = err.into();
        assert!(matches!(converted, DispatchError::Serialization(_)));
    }
}
