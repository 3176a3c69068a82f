use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use worklog_core::{
    Capability, DispatchError, DispatchResult, LivenessConfig, TaskId, WorkerChannel, WorkerId,
    WorkerInfo, WorkerLoad, WorkerRegistration, WorkerStatus,
};

use crate::strategies::SelectionStrategy;

/// 注册表条目：Worker记录及其所在连接
struct WorkerEntry {
    info: WorkerInfo,
    channel: Arc<dyn WorkerChannel>,
    connection_id: Uuid,
}

/// 注册结果
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub worker_id: WorkerId,
    /// 标识本次连接，旧连接的断开通知不会影响新记录
    pub connection_id: Uuid,
    /// 被替换的旧记录上仍未完成的任务
    pub displaced_tasks: Vec<TaskId>,
}

/// 分发时为任务预留的Worker
pub struct Reservation {
    pub worker_id: WorkerId,
    pub connection_id: Uuid,
    pub channel: Arc<dyn WorkerChannel>,
}

/// 被驱逐的Worker
pub struct EvictedWorker {
    pub worker_id: WorkerId,
    pub tasks: Vec<TaskId>,
    pub channel: Arc<dyn WorkerChannel>,
}

/// 一次巡检对注册表造成的变化
#[derive(Default)]
pub struct RegistrySweep {
    pub unreachable: Vec<WorkerId>,
    pub evicted: Vec<EvictedWorker>,
    pub purged: Vec<WorkerId>,
}

/// Worker状态计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerCounts {
    pub registered: usize,
    pub available: usize,
    pub busy: usize,
    pub unreachable: usize,
    pub evicted: usize,
}

/// Worker表
///
/// 所有状态迁移都在持有写锁时完成，同一个Worker的迁移因此是串行的。
#[derive(Default)]
pub struct WorkerTable {
    entries: HashMap<WorkerId, WorkerEntry>,
}

impl WorkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册Worker，声明了相同ID的旧记录会被整体替换
    pub fn register(
        &mut self,
        registration: WorkerRegistration,
        channel: Arc<dyn WorkerChannel>,
        now: DateTime<Utc>,
    ) -> DispatchResult<Registration> {
        registration.validate()?;

        let worker_id = registration
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));
        let connection_id = Uuid::new_v4();
        let info = WorkerInfo::new(worker_id.clone(), registration, now);

        let previous = self.entries.insert(
            worker_id.clone(),
            WorkerEntry {
                info,
                channel,
                connection_id,
            },
        );

        let displaced_tasks = match previous {
            Some(entry) => {
                debug!(
                    "Worker {} 重新注册，替换旧记录 (旧状态: {:?})",
                    worker_id, entry.info.status
                );
                entry.info.active_tasks.into_iter().collect()
            }
            None => Vec::new(),
        };

        Ok(Registration {
            worker_id,
            connection_id,
            displaced_tasks,
        })
    }

    pub fn get(&self, worker_id: &str) -> Option<&WorkerInfo> {
        self.entries.get(worker_id).map(|entry| &entry.info)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Available 或 Busy 的Worker，按ID排序
    pub fn list_active(&self) -> Vec<WorkerInfo> {
        let mut workers: Vec<WorkerInfo> = self
            .entries
            .values()
            .filter(|entry| entry.info.is_active())
            .map(|entry| entry.info.clone())
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    pub fn list_all(&self) -> Vec<WorkerInfo> {
        let mut workers: Vec<WorkerInfo> =
            self.entries.values().map(|entry| entry.info.clone()).collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    pub fn counts(&self) -> WorkerCounts {
        let mut counts = WorkerCounts::default();
        for entry in self.entries.values() {
            match entry.info.status {
                WorkerStatus::Registered => counts.registered += 1,
                WorkerStatus::Available => counts.available += 1,
                WorkerStatus::Busy => counts.busy += 1,
                WorkerStatus::Unreachable => counts.unreachable += 1,
                WorkerStatus::Evicted => counts.evicted += 1,
            }
        }
        counts
    }

    pub fn update_status(
        &mut self,
        worker_id: &str,
        status: WorkerStatus,
        now: DateTime<Utc>,
    ) -> DispatchResult<()> {
        let entry = self
            .entries
            .get_mut(worker_id)
            .ok_or_else(|| DispatchError::worker_not_found(worker_id))?;
        entry.info.transition(status, now)
    }

    /// 记录心跳，失联的Worker在驱逐前收到心跳即恢复
    pub fn record_heartbeat(
        &mut self,
        worker_id: &str,
        timestamp: DateTime<Utc>,
        load: Option<WorkerLoad>,
    ) -> DispatchResult<WorkerStatus> {
        let entry = self
            .entries
            .get_mut(worker_id)
            .ok_or_else(|| DispatchError::worker_not_found(worker_id))?;
        let info = &mut entry.info;
        if info.status.is_evicted() {
            return Err(DispatchError::worker_evicted(worker_id));
        }

        if timestamp > info.last_heartbeat {
            info.last_heartbeat = timestamp;
        }
        if load.is_some() {
            info.load = load;
        }

        let previous = info.status;
        let next = info.settled_status();
        info.transition(next, timestamp)?;

        if previous == WorkerStatus::Unreachable {
            info!("Worker {} 恢复心跳，状态: {:?}", worker_id, next);
        }
        Ok(next)
    }

    /// 确认记录仍属于该连接
    pub fn ensure_connection(&self, worker_id: &str, connection_id: Uuid) -> DispatchResult<()> {
        let entry = self
            .entries
            .get(worker_id)
            .ok_or_else(|| DispatchError::worker_not_found(worker_id))?;
        if entry.connection_id != connection_id {
            return Err(DispatchError::connection_superseded(worker_id));
        }
        Ok(())
    }

    /// 记录来自某条连接的心跳，记录已被新连接替换时拒绝
    pub fn record_connection_heartbeat(
        &mut self,
        worker_id: &str,
        connection_id: Uuid,
        timestamp: DateTime<Utc>,
        load: Option<WorkerLoad>,
    ) -> DispatchResult<WorkerStatus> {
        self.ensure_connection(worker_id, connection_id)?;
        self.record_heartbeat(worker_id, timestamp, load)
    }

    /// 选择一个可接收该能力任务的Worker，并把任务记在它名下
    pub fn reserve(
        &mut self,
        capability: Capability,
        strategy: &dyn SelectionStrategy,
        task_id: TaskId,
        liveness_window: Duration,
        now: DateTime<Utc>,
    ) -> Option<Reservation> {
        let candidates: Vec<&WorkerInfo> = self
            .entries
            .values()
            .filter(|entry| !entry.channel.is_closed())
            .map(|entry| &entry.info)
            .filter(|worker| worker.can_accept(capability, liveness_window, now))
            .collect();

        if candidates.is_empty() {
            debug!("没有具备能力 {} 的可用Worker", capability);
            return None;
        }

        let worker_id = strategy.select(&candidates)?.id.clone();
        let entry = self.entries.get_mut(&worker_id)?;
        if let Err(e) = entry.info.transition(WorkerStatus::Busy, now) {
            warn!("预留Worker {} 失败: {}", worker_id, e);
            return None;
        }
        entry.info.active_tasks.insert(task_id);
        entry.info.last_assigned_at = Some(now);

        Some(Reservation {
            worker_id,
            connection_id: entry.connection_id,
            channel: Arc::clone(&entry.channel),
        })
    }

    /// 撤销尚未发送的预留
    pub fn cancel_reservation(&mut self, worker_id: &str, task_id: TaskId, now: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(worker_id) {
            let info = &mut entry.info;
            if info.active_tasks.remove(&task_id) && info.status == WorkerStatus::Busy {
                let next = info.settled_status();
                let _ = info.transition(next, now);
            }
        }
    }

    /// 发送失败：释放任务并把Worker标记为失联
    pub fn release_failed_transmit(
        &mut self,
        worker_id: &str,
        connection_id: Uuid,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) {
        let Some(entry) = self.entries.get_mut(worker_id) else {
            return;
        };
        if entry.connection_id != connection_id {
            return;
        }
        let info = &mut entry.info;
        info.active_tasks.remove(&task_id);
        if info.status.is_active() && info.transition(WorkerStatus::Unreachable, now).is_ok() {
            warn!("Worker {} 通道不可用，标记为失联", worker_id);
        }
    }

    /// Worker上报任务进入终态
    ///
    /// 返回任务是否仍挂在该Worker名下。
    pub fn finish_task(
        &mut self,
        worker_id: &str,
        task_id: TaskId,
        succeeded: bool,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(worker_id) else {
            return false;
        };
        let info = &mut entry.info;
        if info.status.is_evicted() || !info.active_tasks.remove(&task_id) {
            return false;
        }

        if succeeded {
            info.stats.tasks_completed += 1;
        } else {
            info.stats.tasks_failed += 1;
        }

        if info.status == WorkerStatus::Busy && info.active_tasks.is_empty() {
            let _ = info.transition(WorkerStatus::Available, now);
        }
        true
    }

    /// 连接断开，只处理仍属于该连接的记录
    pub fn mark_disconnected(
        &mut self,
        worker_id: &str,
        connection_id: Uuid,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(worker_id) else {
            return false;
        };
        if entry.connection_id != connection_id {
            debug!("Worker {} 的旧连接断开，记录已被新连接替换", worker_id);
            return false;
        }
        let info = &mut entry.info;
        match info.status {
            WorkerStatus::Registered | WorkerStatus::Available | WorkerStatus::Busy => {
                info.transition(WorkerStatus::Unreachable, now).is_ok()
            }
            _ => false,
        }
    }

    /// 主动注销，经由 Unreachable 进入 Evicted
    pub fn unregister(
        &mut self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<EvictedWorker> {
        let entry = self
            .entries
            .get_mut(worker_id)
            .ok_or_else(|| DispatchError::worker_not_found(worker_id))?;
        let info = &mut entry.info;
        if info.status.is_evicted() {
            return Err(DispatchError::worker_evicted(worker_id));
        }

        info.transition(WorkerStatus::Unreachable, now)?;
        info.transition(WorkerStatus::Evicted, now)?;

        Ok(EvictedWorker {
            worker_id: worker_id.to_string(),
            tasks: info.active_tasks.drain().collect(),
            channel: Arc::clone(&entry.channel),
        })
    }

    /// 巡检：标记失联、驱逐超时的失联Worker、清理过期的驱逐记录
    pub fn sweep(&mut self, config: &LivenessConfig, now: DateTime<Utc>) -> RegistrySweep {
        let mut report = RegistrySweep::default();
        let liveness_window = config.liveness_window();
        let eviction_window = config.eviction_window();
        let evicted_retention = config.evicted_retention();

        for (worker_id, entry) in self.entries.iter_mut() {
            let info = &mut entry.info;
            match info.status {
                WorkerStatus::Registered | WorkerStatus::Available | WorkerStatus::Busy => {
                    if info.is_heartbeat_expired(liveness_window, now)
                        && info.transition(WorkerStatus::Unreachable, now).is_ok()
                    {
                        warn!(
                            "检测到失联Worker: {} (上次心跳: {})",
                            worker_id,
                            info.last_heartbeat.format("%Y-%m-%d %H:%M:%S UTC")
                        );
                        report.unreachable.push(worker_id.clone());
                    }
                }
                WorkerStatus::Unreachable => {
                    let since = info.unreachable_since.unwrap_or(info.last_heartbeat);
                    if now - since > eviction_window
                        && info.transition(WorkerStatus::Evicted, now).is_ok()
                    {
                        warn!(
                            "驱逐Worker: {} (失联时间: {}秒)",
                            worker_id,
                            (now - since).num_seconds()
                        );
                        report.evicted.push(EvictedWorker {
                            worker_id: worker_id.clone(),
                            tasks: info.active_tasks.drain().collect(),
                            channel: Arc::clone(&entry.channel),
                        });
                    }
                }
                WorkerStatus::Evicted => {
                    let evicted_at = info.evicted_at.unwrap_or(now);
                    if now - evicted_at > evicted_retention {
                        report.purged.push(worker_id.clone());
                    }
                }
            }
        }

        for worker_id in &report.purged {
            self.entries.remove(worker_id);
            debug!("清理已驱逐的Worker记录: {}", worker_id);
        }

        report
    }

    pub fn remove(&mut self, worker_id: &str) -> Option<WorkerInfo> {
        self.entries.remove(worker_id).map(|entry| entry.info)
    }
}

/// Worker注册表
///
/// 分发路径、心跳路径和巡检共享同一张表，调用方不需要额外加锁。
#[derive(Default)]
pub struct WorkerRegistry {
    table: RwLock<WorkerTable>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock_table(&self) -> RwLockWriteGuard<'_, WorkerTable> {
        self.table.write().await
    }

    pub async fn register(
        &self,
        registration: WorkerRegistration,
        channel: Arc<dyn WorkerChannel>,
        now: DateTime<Utc>,
    ) -> DispatchResult<Registration> {
        self.table.write().await.register(registration, channel, now)
    }

    pub async fn get(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.table.read().await.get(worker_id).cloned()
    }

    pub async fn list_active(&self) -> Vec<WorkerInfo> {
        self.table.read().await.list_active()
    }

    pub async fn list_all(&self) -> Vec<WorkerInfo> {
        self.table.read().await.list_all()
    }

    pub async fn counts(&self) -> WorkerCounts {
        self.table.read().await.counts()
    }

    pub async fn update_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        now: DateTime<Utc>,
    ) -> DispatchResult<()> {
        self.table.write().await.update_status(worker_id, status, now)
    }

    pub async fn record_heartbeat(
        &self,
        worker_id: &str,
        timestamp: DateTime<Utc>,
        load: Option<WorkerLoad>,
    ) -> DispatchResult<WorkerStatus> {
        self.table
            .write()
            .await
            .record_heartbeat(worker_id, timestamp, load)
    }

    pub async fn ensure_connection(
        &self,
        worker_id: &str,
        connection_id: Uuid,
    ) -> DispatchResult<()> {
        self.table
            .read()
            .await
            .ensure_connection(worker_id, connection_id)
    }

    pub async fn record_connection_heartbeat(
        &self,
        worker_id: &str,
        connection_id: Uuid,
        timestamp: DateTime<Utc>,
        load: Option<WorkerLoad>,
    ) -> DispatchResult<WorkerStatus> {
        self.table
            .write()
            .await
            .record_connection_heartbeat(worker_id, connection_id, timestamp, load)
    }

    pub async fn finish_task(
        &self,
        worker_id: &str,
        task_id: TaskId,
        succeeded: bool,
        now: DateTime<Utc>,
    ) -> bool {
        self.table
            .write()
            .await
            .finish_task(worker_id, task_id, succeeded, now)
    }

    pub async fn release_failed_transmit(
        &self,
        worker_id: &str,
        connection_id: Uuid,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) {
        self.table
            .write()
            .await
            .release_failed_transmit(worker_id, connection_id, task_id, now)
    }

    pub async fn mark_disconnected(
        &self,
        worker_id: &str,
        connection_id: Uuid,
        now: DateTime<Utc>,
    ) -> bool {
        self.table
            .write()
            .await
            .mark_disconnected(worker_id, connection_id, now)
    }

    pub async fn unregister(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<EvictedWorker> {
        self.table.write().await.unregister(worker_id, now)
    }

    pub async fn sweep(&self, config: &LivenessConfig, now: DateTime<Utc>) -> RegistrySweep {
        self.table.write().await.sweep(config, now)
    }

    pub async fn remove(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.table.write().await.remove(worker_id)
    }
}
