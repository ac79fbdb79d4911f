//! 骨架与布娃娃（原生侧）
//!
//! 布娃娃设置内嵌若干部件，每个部件对应骨架的一个关节：
//! 一份刚体创建参数加一份连接父部件的约束设置。

use super::body::{Activation, BodyId, BodySettingsData};
use super::constraint;
use super::filter::{self, CollisionGroupData};
use super::heap::{self, native_object, NativeFault};
use super::system;

// ============================================================================
// 骨架
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkeletonJoint {
    pub name: String,
    pub parent_name: String,
    /// -1 表示根关节或尚未解析
    pub parent_index: i32,
}

pub struct NativeSkeleton {
    pub joints: Vec<SkeletonJoint>,
}

native_object!(NativeSkeleton, "Skeleton");

pub fn create_skeleton() -> u64 {
    heap::alloc_target(NativeSkeleton { joints: Vec::new() })
}

/// 按父关节索引添加关节，返回新关节索引；父关节必须已存在，根关节传 -1
pub fn add_joint(skeleton_va: u64, name: &str, parent_index: i32) -> Result<u32, NativeFault> {
    heap::with_mut::<NativeSkeleton, _>(skeleton_va, |s| -> Result<u32, NativeFault> {
        let parent_name = if parent_index == -1 {
            String::new()
        } else {
            usize::try_from(parent_index)
                .ok()
                .and_then(|i| s.joints.get(i))
                .map(|j| j.name.clone())
                .ok_or(NativeFault::OutOfRange {
                    what: "parent joint",
                    index: i64::from(parent_index),
                    len: s.joints.len(),
                })?
        };
        s.joints.push(SkeletonJoint {
            name: name.to_owned(),
            parent_name,
            parent_index,
        });
        Ok((s.joints.len() - 1) as u32)
    })?
}

/// 按父关节名添加关节；父索引需之后调用 [`calculate_parent_joint_indices`] 解析
pub fn add_joint_named(skeleton_va: u64, name: &str, parent_name: &str) -> Result<u32, NativeFault> {
    heap::with_mut::<NativeSkeleton, _>(skeleton_va, |s| {
        s.joints.push(SkeletonJoint {
            name: name.to_owned(),
            parent_name: parent_name.to_owned(),
            parent_index: -1,
        });
        (s.joints.len() - 1) as u32
    })
}

pub fn calculate_parent_joint_indices(skeleton_va: u64) -> Result<(), NativeFault> {
    heap::with_mut::<NativeSkeleton, _>(skeleton_va, |s| {
        let names: Vec<String> = s.joints.iter().map(|j| j.name.clone()).collect();
        for joint in &mut s.joints {
            joint.parent_index = names
                .iter()
                .position(|n| !joint.parent_name.is_empty() && *n == joint.parent_name)
                .map_or(-1, |i| i as i32);
        }
    })
}

pub fn joint_index(skeleton_va: u64, name: &str) -> Result<i32, NativeFault> {
    heap::with::<NativeSkeleton, _>(skeleton_va, |s| {
        s.joints.iter().position(|j| j.name == name).map_or(-1, |i| i as i32)
    })
}

pub fn num_joints(skeleton_va: u64) -> Result<u32, NativeFault> {
    heap::with::<NativeSkeleton, _>(skeleton_va, |s| s.joints.len() as u32)
}

pub fn joint(skeleton_va: u64, index: u32) -> Result<Option<SkeletonJoint>, NativeFault> {
    heap::with::<NativeSkeleton, _>(skeleton_va, |s| s.joints.get(index as usize).cloned())
}

/// 每个关节的父关节都排在它前面
pub fn are_joints_correctly_ordered(skeleton_va: u64) -> Result<bool, NativeFault> {
    heap::with::<NativeSkeleton, _>(skeleton_va, |s| {
        s.joints
            .iter()
            .enumerate()
            .all(|(i, j)| j.parent_index < i as i32)
    })
}

fn parent_indices(skeleton_va: u64) -> Result<Vec<i32>, NativeFault> {
    if skeleton_va == 0 {
        return Ok(Vec::new());
    }
    heap::with::<NativeSkeleton, _>(skeleton_va, |s| s.joints.iter().map(|j| j.parent_index).collect())
}

// ============================================================================
// 布娃娃设置
// ============================================================================

/// 布娃娃部件，内嵌在布娃娃设置中
pub struct NativePart {
    pub body: BodySettingsData,
    /// 连接父部件的约束设置（持有一次计数），根部件为 0
    pub to_parent: u64,
}

native_object!(NativePart, "RagdollPart", {
    fn held_refs(&self) -> Vec<u64> {
        let mut held = self.body.held_refs();
        held.push(self.to_parent);
        held
    }
});

pub struct NativeRagdollSettings {
    pub skeleton: u64,
    pub parts: Vec<u64>,
    /// `disable_parent_child_collisions` 创建的组过滤表
    pub group_filter: u64,
}

native_object!(NativeRagdollSettings, "RagdollSettings", {
    fn held_refs(&self) -> Vec<u64> {
        vec![self.skeleton, self.group_filter]
    }

    fn embedded_children(&self) -> Vec<u64> {
        self.parts.clone()
    }
});

pub fn create_settings() -> u64 {
    heap::alloc_target(NativeRagdollSettings {
        skeleton: 0,
        parts: Vec::new(),
        group_filter: 0,
    })
}

fn with_settings<R>(settings_va: u64, f: impl FnOnce(&NativeRagdollSettings) -> R) -> Result<R, NativeFault> {
    heap::with::<NativeRagdollSettings, _>(settings_va, f)
}

pub fn skeleton(settings_va: u64) -> Result<u64, NativeFault> {
    with_settings(settings_va, |s| s.skeleton)
}

pub fn set_skeleton(settings_va: u64, skeleton_va: u64) -> Result<(), NativeFault> {
    if skeleton_va != 0 {
        heap::add_ref(skeleton_va)?;
    }
    let previous = heap::with_mut::<NativeRagdollSettings, _>(settings_va, |s| {
        std::mem::replace(&mut s.skeleton, skeleton_va)
    })?;
    if previous != 0 {
        heap::release_ref(previous)?;
    }
    Ok(())
}

pub fn num_parts(settings_va: u64) -> Result<u32, NativeFault> {
    with_settings(settings_va, |s| s.parts.len() as u32)
}

pub fn part(settings_va: u64, index: u32) -> Result<Option<u64>, NativeFault> {
    with_settings(settings_va, |s| s.parts.get(index as usize).copied())
}

/// 调整部件数量；多出的部件被释放
pub fn resize_parts(settings_va: u64, count: u32) -> Result<(), NativeFault> {
    let dropped = heap::with_mut::<NativeRagdollSettings, _>(settings_va, |s| {
        let count = count as usize;
        if count <= s.parts.len() {
            return s.parts.split_off(count);
        }
        while s.parts.len() < count {
            s.parts.push(heap::alloc(NativePart {
                body: BodySettingsData::default(),
                to_parent: 0,
            }));
        }
        Vec::new()
    })?;
    for part_va in dropped {
        heap::free(part_va)?;
    }
    Ok(())
}

pub fn part_data(part_va: u64) -> Result<(BodySettingsData, u64), NativeFault> {
    heap::with::<NativePart, _>(part_va, |p| (p.body.clone(), p.to_parent))
}

/// 修改部件的刚体参数（形状计数请用专门的设置函数）
pub fn edit_part<R>(part_va: u64, f: impl FnOnce(&mut BodySettingsData) -> R) -> Result<R, NativeFault> {
    heap::with_mut::<NativePart, _>(part_va, |p| f(&mut p.body))
}

fn replace_held(part_va: u64, new_va: u64, slot: fn(&mut NativePart) -> &mut u64) -> Result<(), NativeFault> {
    if new_va != 0 {
        heap::add_ref(new_va)?;
    }
    let previous = heap::with_mut::<NativePart, _>(part_va, |p| std::mem::replace(slot(p), new_va))?;
    if previous != 0 {
        heap::release_ref(previous)?;
    }
    Ok(())
}

pub fn set_part_shape(part_va: u64, shape_va: u64) -> Result<(), NativeFault> {
    replace_held(part_va, shape_va, |p| &mut p.body.shape)
}

pub fn set_part_shape_settings(part_va: u64, shape_settings_va: u64) -> Result<(), NativeFault> {
    replace_held(part_va, shape_settings_va, |p| &mut p.body.shape_settings)
}

pub fn set_part_to_parent(part_va: u64, constraint_settings_va: u64) -> Result<(), NativeFault> {
    replace_held(part_va, constraint_settings_va, |p| &mut p.to_parent)
}

/// 检查设置能否生成布娃娃：骨架存在、部件与关节一一对应、关节顺序正确
pub fn stabilize(settings_va: u64) -> Result<bool, NativeFault> {
    let (skeleton_va, parts) = with_settings(settings_va, |s| (s.skeleton, s.parts.clone()))?;
    if skeleton_va == 0 {
        log::warn!("[布娃娃] 设置 {:#x} 没有骨架", settings_va);
        return Ok(false);
    }
    if num_joints(skeleton_va)? as usize != parts.len() {
        log::warn!("[布娃娃] 部件数量与骨架关节数量不一致");
        return Ok(false);
    }
    if !are_joints_correctly_ordered(skeleton_va)? {
        log::warn!("[布娃娃] 骨架关节顺序错误");
        return Ok(false);
    }
    let parents = parent_indices(skeleton_va)?;
    for (index, part_va) in parts.iter().enumerate() {
        let (_, to_parent) = part_data(*part_va)?;
        if parents[index] >= 0 && to_parent == 0 {
            log::warn!("[布娃娃] 部件 {} 缺少连接父部件的约束", index);
            return Ok(false);
        }
    }
    Ok(true)
}

/// 父子部件之间禁止碰撞：新建一张组过滤表，部件的子组号即其索引
pub fn disable_parent_child_collisions(settings_va: u64) -> Result<(), NativeFault> {
    let (skeleton_va, parts) = with_settings(settings_va, |s| (s.skeleton, s.parts.clone()))?;
    let parents = parent_indices(skeleton_va)?;
    let table = filter::create_group_filter(parts.len() as u32);
    heap::add_ref(table)?;
    for (index, part_va) in parts.iter().enumerate() {
        if let Some(&parent) = parents.get(index) {
            if parent >= 0 {
                filter::set_sub_group_collision(table, index as u32, parent as u32, false)?;
            }
        }
        edit_part(*part_va, |body| {
            body.collision_group = CollisionGroupData {
                filter: table,
                group_id: body.collision_group.group_id,
                sub_group_id: index as u32,
            };
        })?;
    }
    let previous = heap::with_mut::<NativeRagdollSettings, _>(settings_va, |s| {
        std::mem::replace(&mut s.group_filter, table)
    })?;
    if previous != 0 {
        heap::release_ref(previous)?;
    }
    Ok(())
}

pub fn group_filter(settings_va: u64) -> Result<u64, NativeFault> {
    with_settings(settings_va, |s| s.group_filter)
}

/// 部件索引 → 约束索引，没有约束的部件为 -1
pub fn body_index_to_constraint_index(settings_va: u64) -> Result<Vec<i32>, NativeFault> {
    let pairs = constraint_index_to_body_pair(settings_va)?;
    let count = num_parts(settings_va)? as usize;
    let mut map = vec![-1; count];
    for (constraint_index, &(_, child)) in pairs.iter().enumerate() {
        if let Some(slot) = map.get_mut(child as usize) {
            *slot = constraint_index as i32;
        }
    }
    Ok(map)
}

/// 约束索引 → (父部件索引, 子部件索引)
///
/// 父关节不在部件范围内（或指向自身）的部件不产生约束。
pub fn constraint_index_to_body_pair(settings_va: u64) -> Result<Vec<(u32, u32)>, NativeFault> {
    let (skeleton_va, parts) = with_settings(settings_va, |s| (s.skeleton, s.parts.clone()))?;
    let parents = parent_indices(skeleton_va)?;
    let mut pairs = Vec::new();
    for (index, part_va) in parts.iter().enumerate() {
        let (_, to_parent) = part_data(*part_va)?;
        let Some(&parent) = parents.get(index) else { continue };
        if parent < 0 || to_parent == 0 {
            continue;
        }
        let parent = parent as usize;
        if parent >= parts.len() || parent == index {
            log::warn!(
                "[布娃娃] 部件 {} 的父关节 {} 没有对应部件 (共 {} 个)，忽略其约束",
                index,
                parent,
                parts.len()
            );
            continue;
        }
        pairs.push((parent as u32, index as u32));
    }
    Ok(pairs)
}

// ============================================================================
// 布娃娃
// ============================================================================

pub struct NativeRagdoll {
    pub system: u64,
    pub settings: u64,
    /// 刚体代理，布娃娃负责销毁
    pub bodies: Vec<u64>,
    pub ids: Vec<BodyId>,
    /// 各持有一次计数
    pub constraints: Vec<u64>,
    pub group_id: u32,
    pub user_data: u64,
}

native_object!(NativeRagdoll, "Ragdoll", {
    fn held_refs(&self) -> Vec<u64> {
        let mut held = vec![self.settings];
        held.extend(self.constraints.iter().copied());
        held
    }

    fn on_free(&mut self, va: u64) {
        if !heap::is_live(self.system) {
            return;
        }
        if let Err(fault) = remove_parts(self.system, &self.ids, &self.constraints) {
            log::warn!("[布娃娃] {:#x} 移出物理系统失败: {}", va, fault);
        }
        for id in &self.ids {
            if let Err(fault) = system::destroy_body(self.system, *id) {
                log::warn!("[布娃娃] {:#x} 销毁刚体 {} 失败: {}", va, id, fault);
            }
        }
    }
});

fn remove_parts(system_va: u64, ids: &[BodyId], constraints: &[u64]) -> Result<(), NativeFault> {
    for constraint_va in constraints {
        system::remove_constraint(system_va, *constraint_va)?;
    }
    for id in ids {
        system::remove_body(system_va, *id)?;
    }
    Ok(())
}

/// 按设置创建布娃娃的刚体与约束（未加入系统）；任一刚体创建失败时返回 0
pub fn create_ragdoll(
    settings_va: u64,
    collision_group_id: u32,
    user_data: u64,
    system_va: u64,
) -> Result<u64, NativeFault> {
    let parts = with_settings(settings_va, |s| s.parts.clone())?;
    let mut bodies = Vec::with_capacity(parts.len());
    let mut ids = Vec::with_capacity(parts.len());
    for part_va in &parts {
        let (mut data, _) = part_data(*part_va)?;
        data.collision_group.group_id = collision_group_id;
        data.user_data = user_data;
        let proxy = system::create_body_from_data(system_va, &data)?;
        if proxy == 0 {
            log::warn!("[布娃娃] 创建第 {} 个部件的刚体失败", bodies.len());
            for id in ids {
                system::destroy_body(system_va, id)?;
            }
            return Ok(0);
        }
        let (_, id) = super::body::body_location(proxy)?;
        bodies.push(proxy);
        ids.push(id);
    }

    let constraints = match create_part_constraints(settings_va, &parts, &bodies) {
        Ok(constraints) => constraints,
        Err(fault) => {
            for id in ids {
                system::destroy_body(system_va, id)?;
            }
            return Err(fault);
        }
    };

    heap::add_ref(settings_va)?;
    Ok(heap::alloc_target(NativeRagdoll {
        system: system_va,
        settings: settings_va,
        bodies,
        ids,
        constraints,
        group_id: collision_group_id,
        user_data,
    }))
}

/// 为每对父子部件创建约束，每个约束持有一次计数；失败时释放已创建的约束
fn create_part_constraints(settings_va: u64, parts: &[u64], bodies: &[u64]) -> Result<Vec<u64>, NativeFault> {
    let mut constraints = Vec::new();
    if let Err(fault) = push_part_constraints(settings_va, parts, bodies, &mut constraints) {
        for constraint_va in constraints {
            if let Err(release) = heap::release_ref(constraint_va) {
                log::warn!("[布娃娃] 释放约束 {:#x} 失败: {}", constraint_va, release);
            }
        }
        return Err(fault);
    }
    Ok(constraints)
}

fn push_part_constraints(
    settings_va: u64,
    parts: &[u64],
    bodies: &[u64],
    constraints: &mut Vec<u64>,
) -> Result<(), NativeFault> {
    let out_of_range = |index: u32| NativeFault::OutOfRange {
        what: "ragdoll part",
        index: i64::from(index),
        len: bodies.len(),
    };
    for (parent, child) in constraint_index_to_body_pair(settings_va)? {
        let part_va = *parts.get(child as usize).ok_or_else(|| out_of_range(child))?;
        let parent_body = *bodies.get(parent as usize).ok_or_else(|| out_of_range(parent))?;
        let child_body = *bodies.get(child as usize).ok_or_else(|| out_of_range(child))?;
        let (_, to_parent) = part_data(part_va)?;
        let constraint_va = constraint::create_constraint(to_parent, parent_body, child_body)?;
        if constraint_va != 0 {
            heap::add_ref(constraint_va)?;
            constraints.push(constraint_va);
        }
    }
    Ok(())
}

fn with_ragdoll<R>(ragdoll_va: u64, f: impl FnOnce(&NativeRagdoll) -> R) -> Result<R, NativeFault> {
    heap::with::<NativeRagdoll, _>(ragdoll_va, f)
}

pub fn add_to_physics_system(ragdoll_va: u64, activation: Activation) -> Result<(), NativeFault> {
    let (system_va, ids, constraints) =
        with_ragdoll(ragdoll_va, |r| (r.system, r.ids.clone(), r.constraints.clone()))?;
    for id in ids {
        system::add_body(system_va, id, activation)?;
    }
    for constraint_va in constraints {
        system::add_constraint(system_va, constraint_va)?;
    }
    Ok(())
}

pub fn remove_from_physics_system(ragdoll_va: u64) -> Result<(), NativeFault> {
    let (system_va, ids, constraints) =
        with_ragdoll(ragdoll_va, |r| (r.system, r.ids.clone(), r.constraints.clone()))?;
    remove_parts(system_va, &ids, &constraints)
}

pub fn body_ids(ragdoll_va: u64) -> Result<Vec<BodyId>, NativeFault> {
    with_ragdoll(ragdoll_va, |r| r.ids.clone())
}

pub fn constraints(ragdoll_va: u64) -> Result<Vec<u64>, NativeFault> {
    with_ragdoll(ragdoll_va, |r| r.constraints.clone())
}

pub fn ragdoll_settings(ragdoll_va: u64) -> Result<u64, NativeFault> {
    with_ragdoll(ragdoll_va, |r| r.settings)
}

pub fn group_id(ragdoll_va: u64) -> Result<u32, NativeFault> {
    with_ragdoll(ragdoll_va, |r| r.group_id)
}

/// 任一部件处于活动状态
pub fn is_active(ragdoll_va: u64) -> Result<bool, NativeFault> {
    let (system_va, ids) = with_ragdoll(ragdoll_va, |r| (r.system, r.ids.clone()))?;
    for id in ids {
        if system::is_active(system_va, id)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_indices_from_names() {
        let skeleton = create_skeleton();
        heap::add_ref(skeleton).unwrap();
        add_joint_named(skeleton, "pelvis", "").unwrap();
        add_joint_named(skeleton, "spine", "pelvis").unwrap();
        add_joint_named(skeleton, "head", "spine").unwrap();
        calculate_parent_joint_indices(skeleton).unwrap();

        assert_eq!(joint(skeleton, 2).unwrap().unwrap().parent_index, 1);
        assert_eq!(joint(skeleton, 0).unwrap().unwrap().parent_index, -1);
        assert_eq!(joint_index(skeleton, "head").unwrap(), 2);
        assert_eq!(joint_index(skeleton, "tail").unwrap(), -1);
        assert!(are_joints_correctly_ordered(skeleton).unwrap());
        heap::release_ref(skeleton).unwrap();
    }

    #[test]
    fn test_add_joint_by_index_records_parent_name() {
        let skeleton = create_skeleton();
        heap::add_ref(skeleton).unwrap();
        let root = add_joint(skeleton, "root", -1).unwrap();
        add_joint(skeleton, "arm", root as i32).unwrap();
        assert_eq!(joint(skeleton, 1).unwrap().unwrap().parent_name, "root");
        heap::release_ref(skeleton).unwrap();
    }

    #[test]
    fn test_add_joint_rejects_missing_parent() {
        let skeleton = create_skeleton();
        heap::add_ref(skeleton).unwrap();
        add_joint(skeleton, "root", -1).unwrap();
        assert!(matches!(
            add_joint(skeleton, "arm", 5),
            Err(NativeFault::OutOfRange { index: 5, len: 1, .. })
        ));
        assert!(add_joint(skeleton, "arm", -2).is_err());
        assert_eq!(num_joints(skeleton).unwrap(), 1);
        heap::release_ref(skeleton).unwrap();
    }

    #[test]
    fn test_parent_outside_parts_has_no_constraint() {
        // 按名字解析出的父关节 5 超出了部件数量
        let skeleton = create_skeleton();
        add_joint_named(skeleton, "root", "").unwrap();
        add_joint_named(skeleton, "a", "e").unwrap();
        for name in ["b", "c", "d", "e"] {
            add_joint_named(skeleton, name, "").unwrap();
        }
        calculate_parent_joint_indices(skeleton).unwrap();
        assert_eq!(joint(skeleton, 1).unwrap().unwrap().parent_index, 5);

        let settings = create_settings();
        heap::add_ref(settings).unwrap();
        set_skeleton(settings, skeleton).unwrap();
        resize_parts(settings, 2).unwrap();
        let point = constraint::create_settings(constraint::ConstraintSettingsKind::Point {
            point1: glam::DVec3::ZERO,
            point2: glam::DVec3::ZERO,
        });
        set_part_to_parent(part(settings, 1).unwrap().unwrap(), point).unwrap();

        assert!(constraint_index_to_body_pair(settings).unwrap().is_empty());
        assert_eq!(body_index_to_constraint_index(settings).unwrap(), vec![-1, -1]);
        heap::release_ref(settings).unwrap();
    }

    #[test]
    fn test_settings_index_maps_and_part_lifetime() {
        let skeleton = create_skeleton();
        add_joint(skeleton, "root", -1).unwrap();
        add_joint(skeleton, "child", 0).unwrap();

        let settings = create_settings();
        heap::add_ref(settings).unwrap();
        set_skeleton(settings, skeleton).unwrap();
        resize_parts(settings, 2).unwrap();
        assert!(!stabilize(settings).unwrap());

        let point = constraint::create_settings(constraint::ConstraintSettingsKind::Point {
            point1: glam::DVec3::ZERO,
            point2: glam::DVec3::ZERO,
        });
        let child = part(settings, 1).unwrap().unwrap();
        set_part_to_parent(child, point).unwrap();
        assert!(stabilize(settings).unwrap());

        assert_eq!(constraint_index_to_body_pair(settings).unwrap(), vec![(0, 1)]);
        assert_eq!(body_index_to_constraint_index(settings).unwrap(), vec![-1, 0]);

        disable_parent_child_collisions(settings).unwrap();
        let table = group_filter(settings).unwrap();
        assert!(!filter::is_sub_group_collision_enabled(table, 0, 1).unwrap());
        assert_eq!(part_data(child).unwrap().0.collision_group.sub_group_id, 1);

        heap::release_ref(settings).unwrap();
        assert!(!heap::is_live(child));
        assert!(!heap::is_live(point));
        assert!(!heap::is_live(skeleton));
        assert!(!heap::is_live(table));
    }
}
