use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{Capability, CapabilitySet, TaskId};
use crate::errors::{DispatchError, DispatchResult};

pub type WorkerId = String;

/// Worker状态
///
/// ```text
/// Registered ──► Available ◄──► Busy
///     │              │           │
///     └──────────► Unreachable ◄─┘
///                     │   ▲ 心跳恢复
///                     ▼
///                  Evicted（终态）
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Registered,
    Available,
    Busy,
    Unreachable,
    Evicted,
}

impl WorkerStatus {
    /// 可参与分发和状态上报
    pub fn is_active(&self) -> bool {
        matches!(self, WorkerStatus::Available | WorkerStatus::Busy)
    }

    pub fn is_evicted(&self) -> bool {
        matches!(self, WorkerStatus::Evicted)
    }

    /// 检查状态迁移是否合法，相同状态视为合法的空迁移（终态除外）
    pub fn can_transition_to(&self, next: WorkerStatus) -> bool {
        use WorkerStatus::*;
        match (*self, next) {
            (Evicted, _) => false,
            (from, to) if from == to => true,
            (Registered, Available) | (Registered, Unreachable) => true,
            (Available, Busy) | (Available, Unreachable) => true,
            (Busy, Available) | (Busy, Unreachable) => true,
            (Unreachable, Available) | (Unreachable, Busy) | (Unreachable, Evicted) => true,
            _ => false,
        }
    }
}

/// Worker自身上报的统计，只由完成报告更新
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

/// 心跳中携带的负载信息
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerLoad {
    pub system_load: Option<f64>,
    pub memory_usage_mb: Option<u64>,
}

/// Worker注册请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRegistration {
    /// 声明的身份，为空时由管理器分配
    #[serde(default)]
    pub worker_id: Option<WorkerId>,
    pub name: String,
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub version: String,
}

impl WorkerRegistration {
    pub fn new<S: Into<String>>(name: S, capabilities: CapabilitySet) -> Self {
        Self {
            worker_id: None,
            name: name.into(),
            capabilities,
            version: String::new(),
        }
    }

    pub fn with_id<S: Into<String>>(mut self, worker_id: S) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = version.into();
        self
    }

    pub fn validate(&self) -> DispatchResult<()> {
        if let Some(id) = &self.worker_id {
            if id.trim().is_empty() {
                return Err(DispatchError::invalid_registration("Worker ID不能为空字符串"));
            }
        }
        if self.name.trim().is_empty() {
            return Err(DispatchError::invalid_registration("Worker名称不能为空"));
        }
        if self.capabilities.is_empty() {
            return Err(DispatchError::invalid_registration("支持的能力不能为空"));
        }
        Ok(())
    }
}

/// Worker节点记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub name: String,
    pub capabilities: CapabilitySet,
    pub version: String,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub stats: WorkerStats,
    pub load: Option<WorkerLoad>,
    pub active_tasks: HashSet<TaskId>,
    pub last_assigned_at: Option<DateTime<Utc>>,
    pub unreachable_since: Option<DateTime<Utc>>,
    pub evicted_at: Option<DateTime<Utc>>,
}

impl WorkerInfo {
    /// 创建新的Worker记录，初始状态为 Registered
    pub fn new(id: WorkerId, registration: WorkerRegistration, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: registration.name,
            capabilities: registration.capabilities,
            version: registration.version,
            status: WorkerStatus::Registered,
            last_heartbeat: now,
            registered_at: now,
            stats: WorkerStats::default(),
            load: None,
            active_tasks: HashSet::new(),
            last_assigned_at: None,
            unreachable_since: None,
            evicted_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn active_task_count(&self) -> usize {
        self.active_tasks.len()
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// 检查心跳是否超出给定窗口
    pub fn is_heartbeat_expired(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_heartbeat > window
    }

    /// 检查Worker在当前时刻能否接收该能力的任务
    pub fn can_accept(
        &self,
        capability: Capability,
        liveness_window: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        self.status == WorkerStatus::Available
            && self.has_capability(capability)
            && !self.is_heartbeat_expired(liveness_window, now)
    }

    /// 迁移到新状态，非法迁移返回错误且不修改记录
    pub fn transition(&mut self, next: WorkerStatus, now: DateTime<Utc>) -> DispatchResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DispatchError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        match next {
            WorkerStatus::Unreachable if self.status != WorkerStatus::Unreachable => {
                self.unreachable_since = Some(now);
            }
            WorkerStatus::Available | WorkerStatus::Busy => self.unreachable_since = None,
            WorkerStatus::Evicted => self.evicted_at = Some(now),
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    /// 有任务时为Busy，否则为Available
    pub fn settled_status(&self) -> WorkerStatus {
        if self.active_tasks.is_empty() {
            WorkerStatus::Available
        } else {
            WorkerStatus::Busy
        }
    }

    pub fn summary(&self) -> WorkerSummary {
        WorkerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            capabilities: self.capabilities,
            version: self.version.clone(),
            status: self.status,
            last_heartbeat: self.last_heartbeat,
            stats: self.stats,
            active_tasks: self.active_tasks.len(),
            load: self.load,
        }
    }
}

/// 提供给HTTP层的Worker只读快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSummary {
    pub id: WorkerId,
    pub name: String,
    pub capabilities: CapabilitySet,
    pub version: String,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub stats: WorkerStats,
    pub active_tasks: usize,
    pub load: Option<WorkerLoad>,
}
