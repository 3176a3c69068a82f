//! Worker任务分发
//!
//! 管理长连接Worker的注册、心跳与驱逐，把任务分发给具备能力的空闲Worker，
//! 并保存任务结果供查询。

pub mod connection;
pub mod liveness;
pub mod manager;
pub mod registry;
pub mod result_store;
pub mod strategies;
pub mod task_dispatcher;

#[cfg(test)]
pub mod test_utils;

pub use connection::MpscWorkerChannel;
pub use liveness::{LivenessMonitor, LivenessService, SweepReport};
pub use manager::{DispatchManager, ManagerStats};
pub use registry::{Registration, WorkerCounts, WorkerRegistry, WorkerTable};
pub use result_store::{TaskCounts, TaskResultStore};
pub use strategies::*;
pub use task_dispatcher::TaskDispatcher;
