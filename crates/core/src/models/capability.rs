use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::DispatchError;

/// 任务类型
///
/// 决定任务所需的Worker能力。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    InsightGeneration,
    WeeklyReport,
}

impl TaskType {
    pub const ALL: [TaskType; 2] = [TaskType::InsightGeneration, TaskType::WeeklyReport];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::InsightGeneration => "insight_generation",
            TaskType::WeeklyReport => "weekly_report",
        }
    }

    /// 执行该类型任务所需的能力
    pub fn required_capability(&self) -> Capability {
        match self {
            TaskType::InsightGeneration => Capability::InsightGeneration,
            TaskType::WeeklyReport => Capability::WeeklyReport,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DispatchError::UnsupportedTaskType(s.to_string()))
    }
}

/// Worker能力标签
///
/// 标签集合是封闭的，与 [`TaskType`] 一一对应。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    InsightGeneration,
    WeeklyReport,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::InsightGeneration, Capability::WeeklyReport];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::InsightGeneration => "insight_generation",
            Capability::WeeklyReport => "weekly_report",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Capability::InsightGeneration => 1 << 0,
            Capability::WeeklyReport => 1 << 1,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| DispatchError::invalid_registration(format!("未知的能力标签: {s}")))
    }
}

/// 能力集合（位图实现）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = CapabilitySet::empty();
        for capability in iter {
            set.insert(capability);
        }
        set
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for CapabilitySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let capabilities = Vec::<Capability>::deserialize(deserializer)?;
        Ok(capabilities.into_iter().collect())
    }
}
