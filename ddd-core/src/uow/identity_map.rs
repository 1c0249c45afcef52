//! 身份映射：会话内 (聚合类型, 标识) → 唯一被跟踪实例
//!
use crate::aggregate::AggregateKey;
use crate::persist::SharedAdapter;
use crate::tracked::TrackedEntry;
use std::collections::HashMap;
use std::sync::Arc;

struct MapEntry {
    entry: Arc<dyn TrackedEntry>,
    adapter: String,
}

/// 某个适配器在本次提交中需要写入的条目
pub(crate) struct AdapterBatch {
    pub(crate) adapter: SharedAdapter,
    pub(crate) entries: Vec<Arc<dyn TrackedEntry>>,
}

#[derive(Default)]
pub(crate) struct IdentityMap {
    /// 登记顺序；被移除的位置留空
    slots: Vec<Option<MapEntry>>,
    index: HashMap<AggregateKey, usize>,
    /// 首次接触顺序
    adapters: Vec<SharedAdapter>,
}

impl IdentityMap {
    pub(crate) fn get(&self, key: &AggregateKey) -> Option<Arc<dyn TrackedEntry>> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_ref().map(|e| Arc::clone(&e.entry))
    }

    /// 登记条目；调用方负责先检查同键冲突
    pub(crate) fn insert(&mut self, entry: Arc<dyn TrackedEntry>, adapter: &SharedAdapter) {
        self.touch(adapter);
        let key = entry.key().clone();
        self.slots.push(Some(MapEntry {
            entry,
            adapter: adapter.name().to_string(),
        }));
        self.index.insert(key, self.slots.len() - 1);
    }

    pub(crate) fn remove(&mut self, key: &AggregateKey) -> Option<Arc<dyn TrackedEntry>> {
        let slot = self.index.remove(key)?;
        self.slots[slot].take().map(|e| e.entry)
    }

    fn touch(&mut self, adapter: &SharedAdapter) {
        if !self.adapters.iter().any(|a| a.name() == adapter.name()) {
            self.adapters.push(Arc::clone(adapter));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &Arc<dyn TrackedEntry>> {
        self.slots.iter().flatten().map(|e| &e.entry)
    }

    pub(crate) fn dirty_count(&self) -> usize {
        self.entries().filter(|e| e.state().is_dirty()).count()
    }

    /// 按适配器首次接触顺序分组脏条目，组内保持登记顺序；没有脏条目的适配器不出现
    pub(crate) fn plan(&self) -> Vec<AdapterBatch> {
        self.adapters
            .iter()
            .filter_map(|adapter| {
                let entries: Vec<_> = self
                    .slots
                    .iter()
                    .flatten()
                    .filter(|e| e.adapter == adapter.name() && e.entry.state().is_dirty())
                    .map(|e| Arc::clone(&e.entry))
                    .collect();
                (!entries.is_empty()).then(|| AdapterBatch {
                    adapter: Arc::clone(adapter),
                    entries,
                })
            })
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.adapters.clear();
    }
}
