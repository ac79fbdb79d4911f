//! 别名保活
//!
//! 原生侧的 A 依赖 B 却不对 B 计数时（例如物理系统引用过滤表），
//! 宿主侧的 A 包装持有 B 的包装，保证 B 不会先于 A 被回收。
//! 每个关系名最多保留一个被持有者，重新设置时替换旧值。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::wrapper::{NativeWrapper, WrapperCore};

/// 保活关系名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relation(pub &'static str);

impl Relation {
    pub const SYSTEM: Relation = Relation("system");
    pub const GROUP_FILTER: Relation = Relation("group_filter");
    pub const BROAD_PHASE_LAYER_INTERFACE: Relation = Relation("broad_phase_layer_interface");
    pub const OBJECT_VS_BROAD_PHASE_FILTER: Relation = Relation("object_vs_broad_phase_filter");
    pub const OBJECT_LAYER_PAIR_FILTER: Relation = Relation("object_layer_pair_filter");
    pub const CONTACT_LISTENER: Relation = Relation("contact_listener");
    pub const BODY1: Relation = Relation("body1");
    pub const BODY2: Relation = Relation("body2");
}

#[derive(Default)]
pub struct KeepAlive {
    held: Mutex<HashMap<Relation, Arc<WrapperCore>>>,
    /// 没有固定关系名、只随拥有者一起释放的被持有者
    pinned: Mutex<Vec<Arc<WrapperCore>>>,
}

impl KeepAlive {
    fn held(&self) -> MutexGuard<'_, HashMap<Relation, Arc<WrapperCore>>> {
        match self.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 替换某关系的被持有者，返回旧值；旧值在锁外析构
    fn put(&self, relation: Relation, core: Option<Arc<WrapperCore>>) -> Option<Arc<WrapperCore>> {
        let mut held = self.held();
        match core {
            Some(core) => held.insert(relation, core),
            None => held.remove(&relation),
        }
    }

    pub fn get(&self, relation: Relation) -> Option<Arc<WrapperCore>> {
        self.held().get(&relation).cloned()
    }

    fn pinned(&self) -> MutexGuard<'_, Vec<Arc<WrapperCore>>> {
        match self.pinned.lock() {
            Ok(pinned) => pinned,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 所有被持有的核心（关系与固定的）
    pub(crate) fn cores(&self) -> Vec<Arc<WrapperCore>> {
        let mut cores: Vec<Arc<WrapperCore>> = self.held().values().cloned().collect();
        cores.extend(self.pinned().iter().cloned());
        cores
    }

    pub fn len(&self) -> usize {
        self.held().len() + self.pinned().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 放开所有被持有者
    pub fn clear(&self) {
        let released: Vec<Arc<WrapperCore>> = self.held().drain().map(|(_, core)| core).collect();
        let unpinned: Vec<Arc<WrapperCore>> = self.pinned().drain(..).collect();
        drop(released);
        drop(unpinned);
    }
}

/// 让 `owner` 持有 `held`，直到 owner 被回收或关系被替换
pub fn retain<O: NativeWrapper, H: NativeWrapper>(owner: &O, relation: Relation, held: &H) {
    let previous = owner
        .core()
        .keep_alive()
        .put(relation, Some(Arc::clone(held.core())));
    drop(previous);
}

/// 让 `owner` 一直持有 `held`，直到 owner 被回收；重复固定同一个对象只记一次
pub fn pin<O: NativeWrapper, H: NativeWrapper>(owner: &O, held: &H) {
    let mut pinned = owner.core().keep_alive().pinned();
    if !pinned.iter().any(|core| Arc::ptr_eq(core, held.core())) {
        pinned.push(Arc::clone(held.core()));
    }
}

/// 解除关系
pub fn release_hold<O: NativeWrapper>(owner: &O, relation: Relation) {
    let previous = owner.core().keep_alive().put(relation, None);
    drop(previous);
}

/// 取回被持有的包装（共享同一个核心）；关系下保存的不是 `H` 类型时返回 `None`
pub fn retained<H: NativeWrapper, O: NativeWrapper>(owner: &O, relation: Relation) -> Option<H> {
    owner
        .core()
        .keep_alive()
        .get(relation)
        .filter(|core| core.record().kind() == H::TYPE_NAME)
        .map(H::from_core)
}

pub fn holds<O: NativeWrapper, H: NativeWrapper>(owner: &O, relation: Relation, held: &H) -> bool {
    owner
        .core()
        .keep_alive()
        .get(relation)
        .is_some_and(|core| Arc::ptr_eq(&core, held.core()))
}
