use serde::{Deserialize, Serialize};

/// 任务分发配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 每个Worker连接的出站队列深度
    pub channel_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channel_capacity == 0 {
            return Err(anyhow::anyhow!("通道容量必须大于0"));
        }
        Ok(())
    }
}

/// Worker存活检测配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LivenessConfig {
    /// Worker预期的心跳间隔（秒）
    pub heartbeat_interval_seconds: u64,
    /// 超过该时间没有心跳即标记为失联（秒）
    pub liveness_window_seconds: u64,
    /// 失联持续超过该时间即驱逐（秒），从标记失联时开始计算
    pub eviction_window_seconds: u64,
    /// 后台巡检间隔（秒）
    pub sweep_interval_seconds: u64,
    /// 已驱逐记录的保留时间（秒）
    pub evicted_retention_seconds: u64,
    /// 注册消息本身是否视为一次心跳
    pub registration_counts_as_heartbeat: bool,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 10,
            liveness_window_seconds: 30, // 3倍心跳间隔
            eviction_window_seconds: 120,
            sweep_interval_seconds: 5,
            evicted_retention_seconds: 600,
            registration_counts_as_heartbeat: true,
        }
    }
}

impl LivenessConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }
        if self.liveness_window_seconds < self.heartbeat_interval_seconds {
            return Err(anyhow::anyhow!(
                "存活窗口({}秒)不能小于心跳间隔({}秒)",
                self.liveness_window_seconds,
                self.heartbeat_interval_seconds
            ));
        }
        if self.eviction_window_seconds <= self.liveness_window_seconds {
            return Err(anyhow::anyhow!(
                "驱逐窗口({}秒)必须大于存活窗口({}秒)",
                self.eviction_window_seconds,
                self.liveness_window_seconds
            ));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("巡检间隔必须大于0"));
        }
        if self.sweep_interval_seconds > self.liveness_window_seconds {
            return Err(anyhow::anyhow!("巡检间隔不能大于存活窗口"));
        }
        Ok(())
    }

    pub fn liveness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.liveness_window_seconds as i64)
    }

    pub fn eviction_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.eviction_window_seconds as i64)
    }

    pub fn evicted_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.evicted_retention_seconds as i64)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// 任务结果存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResultStoreConfig {
    /// 终态任务在完成后保留的时间（秒）
    pub retention_seconds: u64,
    /// 最多保留的任务数，超出时优先清理最早完成的终态任务
    pub max_entries: usize,
}

impl Default for ResultStoreConfig {
    fn default() -> Self {
        Self {
            retention_seconds: 3600,
            max_entries: 10_000,
        }
    }
}

impl ResultStoreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retention_seconds == 0 {
            return Err(anyhow::anyhow!("结果保留时间必须大于0"));
        }
        if self.max_entries == 0 {
            return Err(anyhow::anyhow!("最大任务数必须大于0"));
        }
        Ok(())
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_seconds as i64)
    }
}
