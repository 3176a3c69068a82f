//! # 数据模型
//!
//! Worker、任务以及通道消息的核心数据结构。
//!
//! ## 状态流转
//!
//! ### Worker
//! ```text
//! Registered → Available ⇄ Busy
//!                  ↓        ↓
//!               Unreachable → Evicted
//! ```
//!
//! ### 任务
//! ```text
//! Pending → Running → Succeeded
//!    ↓         ↓
//!    └──────→ Failed
//! ```
//!
//! 所有时间字段使用 `DateTime<Utc>`，状态字段使用枚举避免无效状态。

pub mod capability;
pub mod message;
pub mod task;
pub mod worker;

pub use capability::*;
pub use message::*;
pub use task::*;
pub use worker::*;
