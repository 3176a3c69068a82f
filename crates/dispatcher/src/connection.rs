use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use worklog_core::{
    DispatchError, DispatchMessage, DispatchResult, WorkerChannel, WorkerId, WorkerMessage,
};

use crate::manager::DispatchManager;

/// 基于有界mpsc队列的Worker通道
///
/// `send` 不会等待，队列满时直接返回错误，由分发器把任务标记为失败。
#[derive(Debug, Clone)]
pub struct MpscWorkerChannel {
    sender: mpsc::Sender<DispatchMessage>,
}

impl MpscWorkerChannel {
    pub fn new(sender: mpsc::Sender<DispatchMessage>) -> Self {
        Self { sender }
    }

    /// 创建通道及Worker一侧的接收端
    pub fn pair(capacity: usize) -> (Arc<Self>, mpsc::Receiver<DispatchMessage>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Arc::new(Self::new(sender)), receiver)
    }
}

impl WorkerChannel for MpscWorkerChannel {
    fn send(&self, message: DispatchMessage) -> DispatchResult<()> {
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::ChannelFull,
            TrySendError::Closed(_) => DispatchError::ChannelClosed,
        })
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl DispatchManager {
    /// 处理一条Worker连接，直到连接关闭或Worker被驱逐
    ///
    /// 第一条消息必须是注册消息。同一连接上的消息按到达顺序处理。
    pub async fn serve_connection(
        &self,
        mut inbound: mpsc::Receiver<WorkerMessage>,
        channel: Arc<dyn WorkerChannel>,
    ) -> DispatchResult<WorkerId> {
        let registration = match inbound.recv().await {
            Some(WorkerMessage::Register(registration)) => registration,
            Some(other) => {
                warn!("连接的第一条消息不是注册消息: {}", other.kind());
                return Err(DispatchError::UnexpectedMessage(other.kind().to_string()));
            }
            None => {
                debug!("连接在注册前关闭");
                return Err(DispatchError::ChannelClosed);
            }
        };

        let outcome = self.register_connection(registration, channel).await?;
        let worker_id = outcome.worker_id;
        let connection_id = outcome.connection_id;

        while let Some(message) = inbound.recv().await {
            match self
                .handle_worker_message(&worker_id, connection_id, message)
                .await
            {
                Ok(()) => {}
                Err(
                    e @ (DispatchError::WorkerEvicted { .. }
                    | DispatchError::WorkerNotFound { .. }
                    | DispatchError::ConnectionSuperseded { .. }),
                ) => {
                    warn!("Worker {} 的连接不再有效: {}", worker_id, e);
                    break;
                }
                Err(e) => warn!("处理Worker {} 的消息失败: {}", worker_id, e),
            }
        }

        self.handle_disconnect(&worker_id, connection_id).await;
        info!("Worker {} 的连接已关闭", worker_id);
        Ok(worker_id)
    }

    /// 处理连接上的一条消息，记录已属于其他连接时返回 `ConnectionSuperseded`
    async fn handle_worker_message(
        &self,
        worker_id: &str,
        connection_id: Uuid,
        message: WorkerMessage,
    ) -> DispatchResult<()> {
        match message {
            WorkerMessage::Register(_) => {
                Err(DispatchError::UnexpectedMessage("register".to_string()))
            }
            WorkerMessage::Heartbeat(report) => {
                self.registry()
                    .record_connection_heartbeat(worker_id, connection_id, Utc::now(), report.load)
                    .await?;
                Ok(())
            }
            WorkerMessage::TaskStarted { task_id } => {
                self.registry()
                    .ensure_connection(worker_id, connection_id)
                    .await?;
                self.report_task_started(worker_id, task_id).await?;
                Ok(())
            }
            WorkerMessage::TaskCompleted(report) => {
                self.registry()
                    .ensure_connection(worker_id, connection_id)
                    .await?;
                self.report_task_completion(worker_id, report).await?;
                Ok(())
            }
        }
    }
}
