use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use worklog_core::{AppConfig, Capability, TaskId, TaskType, WorkerRegistration};
use worklog_dispatcher::DispatchManager;

use crate::simulator::{SimulatedWorker, SimulationReport};

/// 主应用程序
pub struct Application {
    config: AppConfig,
    manager: Arc<DispatchManager>,
    simulated_workers: usize,
    demo_tasks: usize,
}

impl Application {
    /// 创建新的应用实例
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate().context("配置验证失败")?;
        let manager = Arc::new(DispatchManager::new(&config));

        Ok(Self {
            config,
            manager,
            simulated_workers: 0,
            demo_tasks: 0,
        })
    }

    pub fn with_simulated_workers(mut self, count: usize) -> Self {
        self.simulated_workers = count;
        self
    }

    pub fn with_demo_tasks(mut self, count: usize) -> Self {
        self.demo_tasks = count;
        self
    }

    pub fn manager(&self) -> Arc<DispatchManager> {
        Arc::clone(&self.manager)
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(
            "启动任务分发管理器 (模拟Worker: {})",
            self.simulated_workers
        );

        let monitor = self.manager.spawn_monitor(shutdown_rx.resubscribe());
        let workers = self.spawn_simulated_workers(&shutdown_rx);

        if self.demo_tasks > 0 {
            self.run_demo_tasks().await;
        }

        let _ = shutdown_rx.recv().await;
        info!("任务分发管理器开始关闭");

        for handle in workers {
            match handle.await {
                Ok(Ok(report)) => info!(
                    "模拟Worker {} 完成任务 {} 个",
                    report.worker_id, report.tasks_completed
                ),
                Ok(Err(e)) => error!("模拟Worker运行失败: {e:#}"),
                Err(e) => error!("模拟Worker任务异常结束: {e}"),
            }
        }
        if let Err(e) = monitor.await {
            error!("存活检测任务异常结束: {e}");
        }

        let stats = self.manager.stats().await;
        info!("最终状态: {:?}", stats);
        Ok(())
    }

    fn spawn_simulated_workers(
        &self,
        shutdown_rx: &broadcast::Receiver<()>,
    ) -> Vec<JoinHandle<Result<SimulationReport>>> {
        (0..self.simulated_workers)
            .map(|index| {
                let capabilities = Capability::ALL.into_iter().collect();
                let registration =
                    WorkerRegistration::new(format!("simulated-{index}"), capabilities)
                        .with_id(format!("sim-{index}"))
                        .with_version(env!("CARGO_PKG_VERSION"));
                let worker =
                    SimulatedWorker::new(registration, self.config.liveness.heartbeat_interval())
                        .with_channel_capacity(self.config.dispatcher.channel_capacity);
                tokio::spawn(worker.run(self.manager(), shutdown_rx.resubscribe()))
            })
            .collect()
    }

    /// 等待模拟Worker上线后分发演示任务并输出结果
    async fn run_demo_tasks(&self) {
        for _ in 0..50 {
            if self.manager.list_active_workers().await.len() >= self.simulated_workers {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let mut queued: Vec<TaskId> = Vec::new();
        for index in 0..self.demo_tasks {
            let task_type = TaskType::ALL[index % TaskType::ALL.len()];
            let mut attempts = 0;
            loop {
                match self
                    .manager
                    .queue_task(task_type, json!({"sequence": index}))
                    .await
                {
                    Ok(task_id) => {
                        queued.push(task_id);
                        break;
                    }
                    Err(e) if e.is_retryable() && attempts < 20 => {
                        attempts += 1;
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                    Err(e) => {
                        warn!("演示任务 {} 分发失败: {}", index, e);
                        break;
                    }
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        for task_id in queued {
            match self.manager.get_task_result(task_id).await {
                Some(summary) => info!(
                    task_id = %task_id,
                    worker_id = %summary.worker_id,
                    status = ?summary.status,
                    "演示任务结果"
                ),
                None => warn!("演示任务 {} 的结果已不存在", task_id),
            }
        }
    }
}
