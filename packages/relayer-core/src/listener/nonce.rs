use std::collections::BTreeSet;

/// 每个 domain 默认保留的最近 nonce 数
pub const DEFAULT_NONCE_WINDOW: usize = 1024;

/// 记录转换器已产出 nonce 的滑动窗口
///
/// 最多保存 `capacity` 个 nonce。被淘汰的 nonce 会抬高下限，
/// 不高于下限的 nonce 都视为已出现
#[derive(Debug, Clone)]
pub struct NonceWindow {
    capacity: usize,
    recent: BTreeSet<u64>,
    floor: Option<u64>,
}

impl NonceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            recent: BTreeSet::new(),
            floor: None,
        }
    }

    pub fn contains(&self, nonce: u64) -> bool {
        self.floor.is_some_and(|floor| nonce <= floor) || self.recent.contains(&nonce)
    }

    /// 记录 `nonce`，已出现过时返回 `false`
    pub fn insert(&mut self, nonce: u64) -> bool {
        if self.contains(nonce) {
            return false;
        }
        self.recent.insert(nonce);
        while self.recent.len() > self.capacity {
            if let Some(evicted) = self.recent.pop_first() {
                self.floor = Some(self.floor.map_or(evicted, |floor| floor.max(evicted)));
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}

impl Default for NonceWindow {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_WINDOW)
    }
}
