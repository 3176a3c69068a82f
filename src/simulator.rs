use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use worklog_core::{
    CompletionReport, DispatchMessage, HeartbeatReport, TaskAssignment, WorkerId, WorkerMessage,
    WorkerRegistration,
};
use worklog_dispatcher::{DispatchManager, MpscWorkerChannel};

/// 模拟Worker的运行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationReport {
    pub worker_id: WorkerId,
    pub tasks_completed: u64,
}

/// 进程内模拟Worker
///
/// 通过mpsc通道连接管理器，按间隔发送心跳，收到任务后回报开始并返回回显结果。
pub struct SimulatedWorker {
    registration: WorkerRegistration,
    heartbeat_interval: Duration,
    work_delay: Duration,
    channel_capacity: usize,
}

impl SimulatedWorker {
    pub fn new(registration: WorkerRegistration, heartbeat_interval: Duration) -> Self {
        Self {
            registration,
            heartbeat_interval,
            work_delay: Duration::from_millis(50),
            channel_capacity: 64,
        }
    }

    pub fn with_work_delay(mut self, work_delay: Duration) -> Self {
        self.work_delay = work_delay;
        self
    }

    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }

    /// 连接管理器并运行，直到收到停止信号或被管理器关闭
    pub async fn run(
        self,
        manager: Arc<DispatchManager>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<SimulationReport> {
        let (inbound_tx, inbound_rx) = mpsc::channel(self.channel_capacity);
        let (channel, mut outbound) = MpscWorkerChannel::pair(self.channel_capacity);

        let connection = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.serve_connection(inbound_rx, channel).await })
        };

        let name = self.registration.name.clone();
        inbound_tx
            .send(WorkerMessage::Register(self.registration.clone()))
            .await
            .context("发送注册消息失败")?;
        info!("模拟Worker {} 已连接", name);

        let mut heartbeat = interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks_completed = 0;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let report = HeartbeatReport::default();
                    if inbound_tx.send(WorkerMessage::Heartbeat(report)).await.is_err() {
                        warn!("模拟Worker {} 的连接已关闭", name);
                        break;
                    }
                }
                message = outbound.recv() => match message {
                    Some(DispatchMessage::AssignTask(assignment)) => {
                        self.execute(&inbound_tx, assignment).await?;
                        tasks_completed += 1;
                    }
                    Some(DispatchMessage::Shutdown { reason }) => {
                        info!("模拟Worker {} 被管理器关闭: {}", name, reason);
                        break;
                    }
                    None => break,
                },
                _ = shutdown_rx.recv() => {
                    debug!("模拟Worker {} 收到停止信号", name);
                    break;
                }
            }
        }

        drop(inbound_tx);
        let worker_id = connection
            .await
            .context("等待连接处理任务结束失败")??;

        info!(
            "模拟Worker {} 已退出，完成任务 {} 个",
            worker_id, tasks_completed
        );
        Ok(SimulationReport {
            worker_id,
            tasks_completed,
        })
    }

    async fn execute(
        &self,
        inbound: &mpsc::Sender<WorkerMessage>,
        assignment: TaskAssignment,
    ) -> Result<()> {
        let task_id = assignment.task_id;
        inbound
            .send(WorkerMessage::TaskStarted { task_id })
            .await
            .context("发送任务开始消息失败")?;

        sleep(self.work_delay).await;

        let result = json!({
            "task_type": assignment.task_type,
            "echo": assignment.payload,
        });
        inbound
            .send(WorkerMessage::TaskCompleted(CompletionReport::success(
                task_id, result,
            )))
            .await
            .context("发送任务结果失败")?;

        debug!("模拟Worker完成任务 {}", task_id);
        Ok(())
    }
}
