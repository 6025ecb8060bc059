use itertools::Itertools;

use crate::desc::EvictionPriority;

/// 一个可参与驱逐评估的驻留纹理。
pub(crate) struct EvictionCandidate {
    pub tex_id: u32,
    pub priority: EvictionPriority,
    pub last_used_frame: u32,
    pub loaded_frame: u32,
    pub memory_usage: usize,
}

fn priority_score(priority: EvictionPriority) -> u32 {
    match priority {
        EvictionPriority::Low => 0,
        EvictionPriority::Normal => 1,
        EvictionPriority::High => 2,
        // 入选前已被过滤掉
        EvictionPriority::KeepResident => 3,
    }
}

/// 在 `budget` 下为 `required` 字节挑选牺牲者，返回按驱逐顺序排列的 id。
///
/// 过滤规则：KeepResident 永不入选；`current_frame - loaded_frame <
/// min_resident_frames` 的纹理在反抖动保护期内，同样跳过。
///
/// 排序：`(priority_score, last_used_frame, id)` 升序。Low 先于
/// Normal 先于 High，同优先级内最久未用者先走，再并列时按 id。走到
/// `current <= budget - required` 即停；候选耗尽仍超预算时返回已选的
/// 部分，批次照常进行，后续加载可能以 OutOfMemory 告终（记录在单个
/// 纹理上，不是致命错误）。
pub(crate) fn select_victims(
    candidates: Vec<EvictionCandidate>,
    current_frame: u32,
    min_resident_frames: u32,
    current_total: usize,
    required: usize,
    budget: usize,
) -> Vec<u32> {
    let target = budget.saturating_sub(required);
    if current_total <= target {
        return Vec::new();
    }

    let ordered = candidates
        .into_iter()
        .filter(|c| c.priority != EvictionPriority::KeepResident)
        .filter(|c| current_frame.wrapping_sub(c.loaded_frame) >= min_resident_frames)
        .sorted_by_key(|c| (priority_score(c.priority), c.last_used_frame, c.tex_id));

    let mut victims = Vec::new();
    let mut remaining = current_total;
    for candidate in ordered {
        if remaining <= target {
            break;
        }
        remaining = remaining.saturating_sub(candidate.memory_usage);
        victims.push(candidate.tex_id);
    }
    victims
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(tex_id: u32, priority: EvictionPriority, last_used: u32, loaded: u32, bytes: usize) -> EvictionCandidate {
        EvictionCandidate {
            tex_id,
            priority,
            last_used_frame: last_used,
            loaded_frame: loaded,
            memory_usage: bytes,
        }
    }

    #[test]
    fn noop_when_under_budget() {
        let victims = select_victims(
            vec![candidate(0, EvictionPriority::Normal, 1, 1, 4096)],
            10,
            0,
            4096,
            2048,
            8192,
        );
        assert!(victims.is_empty());
    }

    #[test]
    fn low_priority_goes_first() {
        let victims = select_victims(
            vec![
                candidate(0, EvictionPriority::High, 1, 0, 1000),
                candidate(1, EvictionPriority::Low, 9, 0, 1000),
                candidate(2, EvictionPriority::Normal, 1, 0, 1000),
            ],
            10,
            0,
            3000,
            1000,
            3000,
        );
        assert_eq!(victims, vec![1]);
    }

    #[test]
    fn lru_within_a_tier() {
        let victims = select_victims(
            vec![
                candidate(0, EvictionPriority::Normal, 5, 0, 1000),
                candidate(1, EvictionPriority::Normal, 2, 0, 1000),
                candidate(2, EvictionPriority::Normal, 8, 0, 1000),
            ],
            10,
            0,
            3000,
            2000,
            3000,
        );
        assert_eq!(victims, vec![1, 0]);
    }

    #[test]
    fn equal_recency_breaks_by_id() {
        let victims = select_victims(
            vec![
                candidate(1, EvictionPriority::Normal, 3, 0, 1000),
                candidate(0, EvictionPriority::Normal, 3, 0, 1000),
            ],
            10,
            0,
            2000,
            1000,
            2000,
        );
        assert_eq!(victims, vec![0]);
    }

    #[test]
    fn keep_resident_and_held_down_are_skipped() {
        let victims = select_victims(
            vec![
                candidate(0, EvictionPriority::KeepResident, 0, 0, 1000),
                // 第 8 帧加载，当前第 10 帧，hold-down 3 帧 → 受保护
                candidate(1, EvictionPriority::Low, 0, 8, 1000),
                candidate(2, EvictionPriority::High, 0, 0, 1000),
            ],
            10,
            3,
            3000,
            3000,
            3000,
        );
        assert_eq!(victims, vec![2]);
    }

    #[test]
    fn required_larger_than_budget_drains_everything_evictable() {
        let victims = select_victims(
            vec![
                candidate(0, EvictionPriority::Normal, 1, 0, 1000),
                candidate(1, EvictionPriority::KeepResident, 1, 0, 1000),
            ],
            10,
            0,
            2000,
            9999,
            1000,
        );
        assert_eq!(victims, vec![0]);
    }
}
