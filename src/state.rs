//! Tag 最近状态缓存
//!
//! 每个实例一把锁，`update` / `get` / `get_all` 都在锁内完成，
//! 锁本身不对外暴露。

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::{CacheEntry, TagReading};

/// tag_id → 最近计数器/时间戳
#[derive(Debug, Default)]
pub struct StateCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl StateCache {
    /// 创建空缓存
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一条读数，返回计数器是否变化
    ///
    /// 首次出现的 tag 视为变化。计数器回退同样视为变化。
    pub fn update(&self, reading: &TagReading) -> bool {
        let entry = CacheEntry {
            last_cnt: reading.cnt,
            last_seen: reading.timestamp,
        };

        let mut entries = self.entries.lock();
        let previous = entries.insert(reading.tag_id.clone(), entry);
        previous.map(|p| p.last_cnt) != Some(reading.cnt)
    }

    /// 获取单个 tag 的状态
    pub fn get(&self, tag_id: &str) -> Option<CacheEntry> {
        self.entries.lock().get(tag_id).copied()
    }

    /// 获取全部状态的快照
    pub fn get_all(&self) -> HashMap<String, CacheEntry> {
        self.entries.lock().clone()
    }

    /// 已跟踪的 tag 数量
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use std::sync::Arc;
    use std::thread;

    fn base_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn reading(tag_id: &str, cnt: i64, offset_ms: i64) -> TagReading {
        let timestamp = base_time() + Duration::milliseconds(offset_ms);
        TagReading {
            tag_id: tag_id.to_string(),
            cnt,
            timestamp,
            raw: format!("TAG,{},{},{}", tag_id, cnt, timestamp.format("%Y%m%d%H%M%S%.3f")),
        }
    }

    #[test]
    fn test_first_reading_is_changed() {
        let cache = StateCache::new();
        assert!(cache.is_empty());
        assert!(cache.update(&reading("a", 5, 0)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_repeat_counter_is_not_changed() {
        let cache = StateCache::new();
        assert!(cache.update(&reading("a", 5, 0)));
        assert!(!cache.update(&reading("a", 5, 1000)));

        // 计数器未变，时间戳仍然更新
        let entry = cache.get("a").unwrap();
        assert_eq!(entry.last_cnt, 5);
        assert_eq!(entry.last_seen, base_time() + Duration::milliseconds(1000));
    }

    #[test]
    fn test_decreasing_counter_is_changed() {
        let cache = StateCache::new();
        cache.update(&reading("a", 10, 0));
        assert!(cache.update(&reading("a", 3, 1000)));
        assert_eq!(cache.get("a").unwrap().last_cnt, 3);
    }

    #[test]
    fn test_tags_are_independent() {
        let cache = StateCache::new();
        assert!(cache.update(&reading("a", 1, 0)));
        assert!(cache.update(&reading("b", 1, 0)));
        assert!(!cache.update(&reading("a", 1, 10)));
        assert!(cache.get("c").is_none());

        let all = cache.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all["b"].last_cnt, 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let cache = StateCache::new();
        cache.update(&reading("a", 1, 0));
        let snapshot = cache.get_all();
        cache.update(&reading("a", 2, 10));
        assert_eq!(snapshot["a"].last_cnt, 1);
        assert_eq!(cache.get("a").unwrap().last_cnt, 2);
    }

    #[test]
    fn test_concurrent_updates_no_lost_or_torn_entries() {
        const THREADS: i64 = 8;
        const PER_THREAD: i64 = 500;

        let cache = Arc::new(StateCache::new());

        // 计数器与时间戳偏移一一对应，用于检测撕裂读
        let writers: Vec<_> = (0..THREADS)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    let tag = format!("tag-{}", t);
                    for i in 0..PER_THREAD {
                        let cnt = t * PER_THREAD + i;
                        cache.update(&reading(&tag, cnt, cnt));
                    }
                })
            })
            .collect();

        let reader = {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    for entry in cache.get_all().values() {
                        let offset = (entry.last_seen - base_time()).num_milliseconds();
                        assert_eq!(offset, entry.last_cnt);
                    }
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        // 每个 tag 只有一个写者，最终值必须是它的最后一次写入
        let all = cache.get_all();
        assert_eq!(all.len(), THREADS as usize);
        for t in 0..THREADS {
            let entry = all[&format!("tag-{}", t)];
            assert_eq!(entry.last_cnt, t * PER_THREAD + PER_THREAD - 1);
        }
    }
}
