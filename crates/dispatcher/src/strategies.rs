use std::cmp::Ordering;

use tracing::debug;

use worklog_core::WorkerInfo;

/// Worker选择策略
///
/// 候选列表已经按能力、状态和心跳过滤，策略只负责排序。
pub trait SelectionStrategy: Send + Sync {
    fn select<'a>(&self, candidates: &[&'a WorkerInfo]) -> Option<&'a WorkerInfo>;

    fn name(&self) -> &str;
}

/// 最少任务优先，其次最久未分配，最后按ID
pub struct LeastLoadedStrategy;

impl LeastLoadedStrategy {
    pub fn new() -> Self {
        Self
    }

    fn compare(a: &WorkerInfo, b: &WorkerInfo) -> Ordering {
        a.active_task_count()
            .cmp(&b.active_task_count())
            .then_with(|| a.last_assigned_at.cmp(&b.last_assigned_at))
            .then_with(|| a.id.cmp(&b.id))
    }
}

impl Default for LeastLoadedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for LeastLoadedStrategy {
    fn select<'a>(&self, candidates: &[&'a WorkerInfo]) -> Option<&'a WorkerInfo> {
        if candidates.is_empty() {
            debug!("没有可用的Worker节点");
            return None;
        }
        let selected = candidates
            .iter()
            .copied()
            .min_by(|a, b| Self::compare(a, b))?;

        debug!(
            "负载均衡策略选择Worker: {} (任务数: {}, 候选数: {})",
            selected.id,
            selected.active_task_count(),
            candidates.len()
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "LeastLoaded"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mocks::{at, registration};
    use uuid::Uuid;
    use worklog_core::Capability;

    fn worker(id: &str, tasks: usize, last_assigned: Option<i64>) -> WorkerInfo {
        let mut info = WorkerInfo::new(
            id.to_string(),
            registration(id, &[Capability::InsightGeneration]),
            at(0),
        );
        for _ in 0..tasks {
            info.active_tasks.insert(Uuid::new_v4());
        }
        info.last_assigned_at = last_assigned.map(at);
        info
    }

    #[test]
    fn test_empty_candidates() {
        assert!(LeastLoadedStrategy::new().select(&[]).is_none());
    }

    #[test]
    fn test_prefers_fewest_tasks() {
        let busy = worker("a", 2, None);
        let idle = worker("b", 0, Some(100));
        let selected = LeastLoadedStrategy::new().select(&[&busy, &idle]).unwrap();
        assert_eq!(selected.id, "b");
    }

    #[test]
    fn test_prefers_longest_idle() {
        let recent = worker("a", 0, Some(50));
        let older = worker("b", 0, Some(10));
        let never = worker("c", 0, None);

        let strategy = LeastLoadedStrategy::new();
        assert_eq!(strategy.select(&[&recent, &older]).unwrap().id, "b");
        assert_eq!(strategy.select(&[&recent, &older, &never]).unwrap().id, "c");
    }

    #[test]
    fn test_ties_break_on_id() {
        let b = worker("b", 0, None);
        let a = worker("a", 0, None);
        let selected = LeastLoadedStrategy::new().select(&[&b, &a]).unwrap();
        assert_eq!(selected.id, "a");
    }

    #[test]
    fn test_strategy_name() {
        assert_eq!(LeastLoadedStrategy::new().name(), "LeastLoaded");
    }
}
