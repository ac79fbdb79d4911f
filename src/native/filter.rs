//! 碰撞过滤（原生侧）
//!
//! 物体层通过查表映射为 Rapier 的 `InteractionGroups`，
//! 碰撞组过滤在步进时由 [`GroupFilterHooks`] 完成。

use rapier3d::geometry::InteractionTestMode;
use rapier3d::prelude::*;
use std::collections::HashMap;

use super::heap::{self, native_object, NativeFault};

/// Rapier 碰撞组只有 32 位
pub const MAX_OBJECT_LAYERS: u32 = 32;
/// 无效的组 / 子组 ID
pub const INVALID_GROUP: u32 = u32::MAX;

pub struct NativeBroadPhaseLayerInterfaceTable {
    pub num_broad_phase_layers: u32,
    /// 物体层 → 宽相层
    pub mapping: Vec<u8>,
}

native_object!(NativeBroadPhaseLayerInterfaceTable, "BroadPhaseLayerInterfaceTable");

pub struct NativeObjectLayerPairFilterTable {
    pub num_object_layers: u32,
    pub table: Vec<bool>,
}

native_object!(NativeObjectLayerPairFilterTable, "ObjectLayerPairFilterTable");

pub struct NativeObjectVsBroadPhaseLayerFilterTable {
    pub num_object_layers: u32,
    pub num_broad_phase_layers: u32,
    pub table: Vec<bool>,
}

native_object!(NativeObjectVsBroadPhaseLayerFilterTable, "ObjectVsBroadPhaseLayerFilterTable");

/// 子组碰撞表（可计数）
pub struct NativeGroupFilterTable {
    pub num_sub_groups: u32,
    pub table: Vec<bool>,
}

native_object!(NativeGroupFilterTable, "GroupFilterTable");

// ============================================================================
// 宽相层接口
// ============================================================================

pub fn create_bp_interface(num_object_layers: u32, num_broad_phase_layers: u32) -> u64 {
    heap::alloc(NativeBroadPhaseLayerInterfaceTable {
        num_broad_phase_layers,
        mapping: vec![0; num_object_layers as usize],
    })
}

/// 返回 false 表示层号越界
pub fn map_object_to_broad_phase_layer(
    va: u64,
    object_layer: u32,
    broad_phase_layer: u8,
) -> Result<bool, NativeFault> {
    heap::with_mut::<NativeBroadPhaseLayerInterfaceTable, _>(va, |t| {
        if broad_phase_layer as u32 >= t.num_broad_phase_layers {
            return false;
        }
        match t.mapping.get_mut(object_layer as usize) {
            Some(slot) => {
                *slot = broad_phase_layer;
                true
            }
            None => false,
        }
    })
}

pub fn broad_phase_layer(va: u64, object_layer: u32) -> Result<Option<u8>, NativeFault> {
    heap::with::<NativeBroadPhaseLayerInterfaceTable, _>(va, |t| {
        t.mapping.get(object_layer as usize).copied()
    })
}

pub fn num_broad_phase_layers(va: u64) -> Result<u32, NativeFault> {
    heap::with::<NativeBroadPhaseLayerInterfaceTable, _>(va, |t| t.num_broad_phase_layers)
}

// ============================================================================
// 物体层对过滤
// ============================================================================

pub fn create_ovo_filter(num_object_layers: u32) -> u64 {
    let n = num_object_layers as usize;
    heap::alloc(NativeObjectLayerPairFilterTable {
        num_object_layers,
        table: vec![false; n * n],
    })
}

pub fn set_layer_collision(va: u64, layer1: u32, layer2: u32, enabled: bool) -> Result<bool, NativeFault> {
    heap::with_mut::<NativeObjectLayerPairFilterTable, _>(va, |t| {
        let n = t.num_object_layers;
        if layer1 >= n || layer2 >= n {
            return false;
        }
        let n = n as usize;
        let (a, b) = (layer1 as usize, layer2 as usize);
        t.table[a * n + b] = enabled;
        t.table[b * n + a] = enabled;
        true
    })
}

pub fn layers_should_collide(va: u64, layer1: u32, layer2: u32) -> Result<bool, NativeFault> {
    heap::with::<NativeObjectLayerPairFilterTable, _>(va, |t| {
        let n = t.num_object_layers;
        if layer1 >= n || layer2 >= n {
            return false;
        }
        t.table[layer1 as usize * n as usize + layer2 as usize]
    })
}

// ============================================================================
// 物体层 vs 宽相层过滤
// ============================================================================

/// 由宽相层接口与物体层对过滤推导：某物体层与某宽相层碰撞，
/// 当且仅当映射到该宽相层的任一物体层与它碰撞
pub fn create_ovb_filter(
    bp_interface_va: u64,
    num_broad_phase_layers: u32,
    ovo_filter_va: u64,
    num_object_layers: u32,
) -> Result<u64, NativeFault> {
    let mapping = heap::with::<NativeBroadPhaseLayerInterfaceTable, _>(bp_interface_va, |t| {
        t.mapping.clone()
    })?;
    let pairs = heap::with::<NativeObjectLayerPairFilterTable, _>(ovo_filter_va, |t| {
        (t.num_object_layers, t.table.clone())
    })?;
    let (ovo_layers, ovo_table) = pairs;

    let n_obj = num_object_layers as usize;
    let n_bp = num_broad_phase_layers as usize;
    let mut table = vec![false; n_obj * n_bp];
    for layer1 in 0..n_obj.min(ovo_layers as usize) {
        for layer2 in 0..n_obj.min(ovo_layers as usize).min(mapping.len()) {
            if ovo_table[layer1 * ovo_layers as usize + layer2] {
                let bp = mapping[layer2] as usize;
                if bp < n_bp {
                    table[layer1 * n_bp + bp] = true;
                }
            }
        }
    }
    Ok(heap::alloc(NativeObjectVsBroadPhaseLayerFilterTable {
        num_object_layers,
        num_broad_phase_layers,
        table,
    }))
}

pub fn layer_and_broad_phase_should_collide(
    va: u64,
    object_layer: u32,
    broad_phase_layer: u8,
) -> Result<bool, NativeFault> {
    heap::with::<NativeObjectVsBroadPhaseLayerFilterTable, _>(va, |t| {
        let bp = broad_phase_layer as u32;
        if object_layer >= t.num_object_layers || bp >= t.num_broad_phase_layers {
            return false;
        }
        t.table[(object_layer * t.num_broad_phase_layers + bp) as usize]
    })
}

// ============================================================================
// 物体层 → Rapier 碰撞组
// ============================================================================

/// 三张表的快照，步进前从堆中读出，步进期间不再访问堆
#[derive(Debug, Clone, Default)]
pub struct LayerTables {
    groups: Vec<InteractionGroups>,
}

impl LayerTables {
    pub fn snapshot(bp_interface_va: u64, ovb_va: u64, ovo_va: u64) -> Result<Self, NativeFault> {
        let mapping = heap::with::<NativeBroadPhaseLayerInterfaceTable, _>(bp_interface_va, |t| {
            t.mapping.clone()
        })?;
        let num_layers = (mapping.len() as u32).min(MAX_OBJECT_LAYERS);
        let mut groups = Vec::with_capacity(num_layers as usize);
        for layer in 0..num_layers {
            let mut filter = 0u32;
            for other in 0..num_layers {
                let pair = layers_should_collide(ovo_va, layer, other)?;
                let bp = mapping[other as usize];
                let broad = layer_and_broad_phase_should_collide(ovb_va, layer, bp)?;
                if pair && broad {
                    filter |= 1 << other;
                }
            }
            groups.push(InteractionGroups::new(
                Group::from_bits_truncate(1 << layer),
                Group::from_bits_truncate(filter),
                InteractionTestMode::default(),
            ));
        }
        Ok(Self { groups })
    }

    /// 越界的层不与任何物体碰撞
    pub fn groups(&self, object_layer: u32) -> InteractionGroups {
        self.groups.get(object_layer as usize).copied().unwrap_or_else(|| {
            InteractionGroups::new(Group::empty(), Group::empty(), InteractionTestMode::default())
        })
    }
}

// ============================================================================
// 碰撞组
// ============================================================================

pub fn create_group_filter(num_sub_groups: u32) -> u64 {
    let n = num_sub_groups as usize;
    heap::alloc_target(NativeGroupFilterTable {
        num_sub_groups,
        table: vec![true; n * n],
    })
}

pub fn set_sub_group_collision(
    va: u64,
    sub_group1: u32,
    sub_group2: u32,
    enabled: bool,
) -> Result<bool, NativeFault> {
    heap::with_mut::<NativeGroupFilterTable, _>(va, |t| {
        let n = t.num_sub_groups;
        if sub_group1 >= n || sub_group2 >= n {
            return false;
        }
        let n = n as usize;
        let (a, b) = (sub_group1 as usize, sub_group2 as usize);
        t.table[a * n + b] = enabled;
        t.table[b * n + a] = enabled;
        true
    })
}

pub fn is_sub_group_collision_enabled(va: u64, sub_group1: u32, sub_group2: u32) -> Result<bool, NativeFault> {
    heap::with::<NativeGroupFilterTable, _>(va, |t| {
        let n = t.num_sub_groups;
        if sub_group1 >= n || sub_group2 >= n {
            return false;
        }
        t.table[(sub_group1 * n + sub_group2) as usize]
    })
}

/// 刚体上的碰撞组；`filter` 为组过滤表的裸地址（不计数）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionGroupData {
    pub filter: u64,
    pub group_id: u32,
    pub sub_group_id: u32,
}

impl Default for CollisionGroupData {
    fn default() -> Self {
        Self {
            filter: 0,
            group_id: INVALID_GROUP,
            sub_group_id: INVALID_GROUP,
        }
    }
}

/// 组过滤表的只读副本
#[derive(Debug, Clone)]
struct FilterSnapshot {
    num_sub_groups: u32,
    table: Vec<bool>,
}

impl FilterSnapshot {
    fn can_collide(&self, group1: &CollisionGroupData, group2: &CollisionGroupData) -> bool {
        if group1.group_id == INVALID_GROUP || group2.group_id == INVALID_GROUP {
            return true;
        }
        if group1.group_id != group2.group_id {
            return true;
        }
        if group1.filter != group2.filter {
            return false;
        }
        if group1.sub_group_id == group2.sub_group_id {
            return false;
        }
        let n = self.num_sub_groups;
        if group1.sub_group_id >= n || group2.sub_group_id >= n {
            return true;
        }
        self.table[(group1.sub_group_id * n + group2.sub_group_id) as usize]
    }
}

/// 步进期间的碰撞组过滤钩子
///
/// 碰撞体的 `user_data` 存放刚体 ID。
pub struct GroupFilterHooks {
    groups: HashMap<u32, CollisionGroupData>,
    filters: HashMap<u64, FilterSnapshot>,
}

impl GroupFilterHooks {
    pub fn new() -> Self {
        Self {
            groups: HashMap::new(),
            filters: HashMap::new(),
        }
    }

    /// 登记刚体的碰撞组；过滤表已失效时该刚体按无过滤处理
    pub fn register(&mut self, body_id: u32, group: CollisionGroupData) {
        if group.filter == 0 {
            return;
        }
        if !self.filters.contains_key(&group.filter) {
            let snapshot = heap::with::<NativeGroupFilterTable, _>(group.filter, |t| FilterSnapshot {
                num_sub_groups: t.num_sub_groups,
                table: t.table.clone(),
            });
            match snapshot {
                Ok(snapshot) => {
                    self.filters.insert(group.filter, snapshot);
                }
                Err(fault) => {
                    log::warn!("[碰撞组] 刚体 {:#x} 的组过滤表不可用: {}", body_id, fault);
                    return;
                }
            }
        }
        self.groups.insert(body_id, group);
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// 先用第一个刚体的过滤表，没有则用第二个的
    pub fn can_collide(&self, body1: u32, body2: u32) -> bool {
        let default = CollisionGroupData::default();
        let group1 = self.groups.get(&body1).unwrap_or(&default);
        let group2 = self.groups.get(&body2).unwrap_or(&default);
        if let Some(filter) = self.filters.get(&group1.filter) {
            filter.can_collide(group1, group2)
        } else if let Some(filter) = self.filters.get(&group2.filter) {
            filter.can_collide(group2, group1)
        } else {
            true
        }
    }
}

impl Default for GroupFilterHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsHooks for GroupFilterHooks {
    fn filter_contact_pair(&self, context: &PairFilterContext) -> Option<SolverFlags> {
        let body1 = context.colliders[context.collider1].user_data as u32;
        let body2 = context.colliders[context.collider2].user_data as u32;
        if self.can_collide(body1, body2) {
            Some(SolverFlags::COMPUTE_IMPULSES)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_tables_follow_pair_filter() {
        let bp = create_bp_interface(2, 2);
        assert!(map_object_to_broad_phase_layer(bp, 0, 0).unwrap());
        assert!(map_object_to_broad_phase_layer(bp, 1, 1).unwrap());
        assert!(!map_object_to_broad_phase_layer(bp, 1, 5).unwrap());

        let ovo = create_ovo_filter(2);
        set_layer_collision(ovo, 0, 1, true).unwrap();
        set_layer_collision(ovo, 1, 1, true).unwrap();
        let ovb = create_ovb_filter(bp, 2, ovo, 2).unwrap();
        assert!(layer_and_broad_phase_should_collide(ovb, 0, 1).unwrap());
        assert!(!layer_and_broad_phase_should_collide(ovb, 0, 0).unwrap());

        let tables = LayerTables::snapshot(bp, ovb, ovo).unwrap();
        let non_moving = tables.groups(0);
        let moving = tables.groups(1);
        assert!(non_moving.test(moving));
        assert!(moving.test(moving));
        assert!(!non_moving.test(non_moving));

        for va in [ovb, ovo, bp] {
            heap::free(va).unwrap();
        }
    }

    #[test]
    fn test_group_filter_semantics() {
        let filter = create_group_filter(3);
        heap::add_ref(filter).unwrap();
        set_sub_group_collision(filter, 0, 1, false).unwrap();
        assert!(!is_sub_group_collision_enabled(filter, 1, 0).unwrap());

        let mut hooks = GroupFilterHooks::new();
        hooks.register(1, CollisionGroupData { filter, group_id: 7, sub_group_id: 0 });
        hooks.register(2, CollisionGroupData { filter, group_id: 7, sub_group_id: 1 });
        hooks.register(3, CollisionGroupData { filter, group_id: 7, sub_group_id: 2 });
        hooks.register(4, CollisionGroupData { filter, group_id: 8, sub_group_id: 1 });

        assert!(!hooks.can_collide(1, 2));
        assert!(!hooks.can_collide(2, 1));
        assert!(hooks.can_collide(1, 3));
        assert!(hooks.can_collide(1, 4));
        // 未登记的刚体不受约束
        assert!(hooks.can_collide(1, 99));

        heap::release_ref(filter).unwrap();
    }
}
