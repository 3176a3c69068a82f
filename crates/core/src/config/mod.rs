//! 配置管理
//!
//! 加载顺序：内置默认值 → TOML配置文件 → `WORKLOG_` 前缀的环境变量。
//! 各段配置在加载后统一校验，校验失败时返回带上下文的 `anyhow` 错误。

pub mod models;

pub use models::*;
