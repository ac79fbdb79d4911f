//! 物理系统（原生侧）
//!
//! 管理 Rapier 物理世界、刚体注册表、约束注册表和接触事件。
//! 刚体记录在创建后即存在；只有加入系统后其刚体和碰撞体才进入 Rapier 集合。
//!
//! 锁顺序：布娃娃 → 物理系统 → 约束 / 形状 / 过滤表 / 监听器。
//! 调用监听器回调时不持有任何槽位锁。

use glam::{DMat4, DVec3, Quat, Vec3};
use rapier3d::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::body::{self, Activation, BodyId, BodySettingsData, BodyState, MotionType, NativeBody};
use super::constraint::NativeConstraint;
use super::convert::{from_pose, from_vector, pose_to_dmat4, to_pose, to_vector};
use super::filter::{CollisionGroupData, GroupFilterHooks, LayerTables};
use super::heap::{self, native_object, NativeFault};
use super::job;
use super::listener::{self, ContactEvent, ContactManifold};
use super::lock::{BodyLocks, StripeGuard};
use super::shape;
use crate::config::get_config;

/// 临时分配器容量不足以容纳本次步进的接触数据
pub const MANIFOLD_CACHE_FULL: u32 = 1 << 0;
/// 接触刚体对数量超过 `max_body_pairs`
pub const BODY_PAIR_CACHE_FULL: u32 = 1 << 1;
/// 接触流形数量超过 `max_contact_constraints`
pub const CONTACT_CONSTRAINTS_FULL: u32 = 1 << 2;

/// Rapier 物理世界
struct World {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
    gravity: Vector,
}

impl World {
    fn new() -> Self {
        let config = get_config();
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.num_solver_iterations =
            NonZeroUsize::new(config.solver_iterations).unwrap_or(NonZeroUsize::MIN).get();
        integration_parameters.num_internal_pgs_iterations = config.pgs_iterations;
        let [gx, gy, gz] = config.default_gravity;

        Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            gravity: Vector::new(gx, gy, gz),
        }
    }

    fn step(&mut self, dt: f32, hooks: &GroupFilterHooks) {
        self.integration_parameters.dt = dt;
        self.pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            hooks,
            &(),
        );
    }
}

enum Placement {
    /// 未加入系统：刚体与碰撞体由记录自己保存
    Detached { body: Box<RigidBody>, collider: Box<Collider> },
    /// 已加入系统
    Simulated { body: RigidBodyHandle, collider: ColliderHandle },
}

/// 刚体记录；`shape` 持有一次计数
pub struct BodyRecord {
    pub id: BodyId,
    pub proxy: u64,
    pub motion_type: MotionType,
    pub object_layer: u32,
    pub collision_group: CollisionGroupData,
    pub shape: u64,
    pub user_data: u64,
    placement: Placement,
}

impl BodyRecord {
    pub fn is_added(&self) -> bool {
        matches!(self.placement, Placement::Simulated { .. })
    }
}

#[derive(Default)]
struct BodySlot {
    sequence: u8,
    record: Option<BodyRecord>,
}

/// 宿主可见的刚体接口代理（随系统一起释放）
pub struct NativeBodyInterface {
    pub system: u64,
    pub locking: bool,
}

native_object!(NativeBodyInterface, "BodyInterface");

pub struct NativeBodyLockInterface {
    pub system: u64,
    pub locking: bool,
}

native_object!(NativeBodyLockInterface, "BodyLockInterface");

pub struct NativeSystem {
    pub max_bodies: u32,
    pub max_body_pairs: u32,
    pub max_contact_constraints: u32,
    /// 三个过滤接口与接触监听器均为裸地址，由宿主侧保活
    pub bp_interface: u64,
    pub ovb_filter: u64,
    pub ovo_filter: u64,
    pub contact_listener: u64,
    layers: LayerTables,
    world: World,
    slots: Vec<BodySlot>,
    free_indices: Vec<u32>,
    num_bodies: u32,
    locks: Arc<BodyLocks>,
    interfaces: [u64; 4],
    /// 已加入的约束，各持有一次计数
    constraints: Vec<u64>,
    joints: HashMap<u64, (ImpulseJointHandle, BodyId, BodyId)>,
    active_pairs: BTreeSet<(BodyId, BodyId)>,
}

native_object!(NativeSystem, "PhysicsSystem", {
    fn held_refs(&self) -> Vec<u64> {
        let mut held: Vec<u64> = self.records().map(|r| r.shape).collect();
        held.extend(self.constraints.iter().copied());
        held
    }

    fn embedded_children(&self) -> Vec<u64> {
        let mut children: Vec<u64> = self.records().map(|r| r.proxy).collect();
        children.extend(self.interfaces.iter().copied());
        children
    }
});

impl NativeSystem {
    fn records(&self) -> impl Iterator<Item = &BodyRecord> {
        self.slots.iter().filter_map(|s| s.record.as_ref())
    }

    fn record(&self, id: BodyId) -> Option<&BodyRecord> {
        let slot = self.slots.get(id.index() as usize)?;
        slot.record.as_ref().filter(|r| r.id == id)
    }

    fn record_mut(&mut self, id: BodyId) -> Option<&mut BodyRecord> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        slot.record.as_mut().filter(|r| r.id == id)
    }

    fn rigid_body<'a>(&'a self, record: &'a BodyRecord) -> Option<&'a RigidBody> {
        match &record.placement {
            Placement::Detached { body, .. } => Some(body.as_ref()),
            Placement::Simulated { body, .. } => self.world.bodies.get(*body),
        }
    }

    fn body_handle(&self, id: BodyId) -> Option<RigidBodyHandle> {
        match self.record(id)?.placement {
            Placement::Simulated { body, .. } => Some(body),
            Placement::Detached { .. } => None,
        }
    }

    /// 以可写方式访问刚体与碰撞体
    fn body_parts_mut(&mut self, id: BodyId) -> Option<(&mut RigidBody, &mut Collider, MotionType)> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        let record = slot.record.as_mut().filter(|r| r.id == id)?;
        let motion_type = record.motion_type;
        match &mut record.placement {
            Placement::Detached { body, collider } => Some((body.as_mut(), collider.as_mut(), motion_type)),
            Placement::Simulated { body, collider } => {
                let rb = self.world.bodies.get_mut(*body)?;
                let co = self.world.colliders.get_mut(*collider)?;
                Some((rb, co, motion_type))
            }
        }
    }

    fn allocate_id(&mut self) -> Option<BodyId> {
        if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.slots[index as usize];
            slot.sequence = slot.sequence.wrapping_add(1);
            return Some(BodyId::new(index, slot.sequence));
        }
        let index = self.slots.len() as u32;
        if index > BodyId::MAX_INDEX {
            return None;
        }
        self.slots.push(BodySlot::default());
        Some(BodyId::new(index, 0))
    }

    fn is_active(&self, record: &BodyRecord) -> bool {
        record.is_added()
            && record.motion_type != MotionType::Static
            && self.rigid_body(record).is_some_and(|rb| !rb.is_sleeping())
    }

    fn group_hooks(&self) -> GroupFilterHooks {
        let mut hooks = GroupFilterHooks::new();
        for record in self.records().filter(|r| r.is_added()) {
            hooks.register(record.id.raw(), record.collision_group);
        }
        hooks
    }

    /// 让约束的关节与"两个刚体都在模拟中且约束启用"保持一致
    fn sync_constraint(&mut self, constraint_va: u64) -> Result<(), NativeFault> {
        let (id1, id2, enabled, joint) = heap::with::<NativeConstraint, _>(constraint_va, |c| {
            (c.id1, c.id2, c.params.enabled, c.build_joint())
        })?;
        let wanted = enabled && self.constraints.contains(&constraint_va);
        let handles = (self.body_handle(id1), self.body_handle(id2));
        match (self.joints.get(&constraint_va).copied(), wanted, handles) {
            (Some((joint_handle, ..)), false, _) | (Some((joint_handle, ..)), true, (None, _) | (_, None)) => {
                self.world.impulse_joints.remove(joint_handle, true);
                self.joints.remove(&constraint_va);
            }
            (None, true, (Some(h1), Some(h2))) => {
                let joint_handle = self.world.impulse_joints.insert(h1, h2, joint, true);
                self.joints.insert(constraint_va, (joint_handle, id1, id2));
            }
            _ => {}
        }
        Ok(())
    }

    fn sync_all_constraints(&mut self) {
        for constraint_va in self.constraints.clone() {
            if let Err(fault) = self.sync_constraint(constraint_va) {
                log::warn!("[物理系统] 同步约束 {:#x} 失败: {}", constraint_va, fault);
            }
        }
    }

    fn detach_joints_of(&mut self, id: BodyId) {
        let affected: Vec<u64> = self
            .joints
            .iter()
            .filter(|(_, (_, a, b))| *a == id || *b == id)
            .map(|(va, _)| *va)
            .collect();
        for constraint_va in affected {
            if let Some((joint_handle, ..)) = self.joints.remove(&constraint_va) {
                self.world.impulse_joints.remove(joint_handle, false);
            }
        }
    }

    /// 收集本次步进后的接触对，返回 (接触对 → 流形, 流形总数)
    fn collect_contacts(&self) -> (BTreeMap<(BodyId, BodyId), ContactManifold>, usize) {
        let mut pairs = BTreeMap::new();
        let mut num_manifolds = 0;
        for pair in self.world.narrow_phase.contact_pairs() {
            if !pair.has_any_active_contact() {
                continue;
            }
            let (Some(c1), Some(c2)) = (
                self.world.colliders.get(pair.collider1),
                self.world.colliders.get(pair.collider2),
            ) else {
                continue;
            };
            num_manifolds += pair.manifolds.len();
            let id1 = BodyId::from_raw(c1.user_data as u32);
            let id2 = BodyId::from_raw(c2.user_data as u32);
            let flip = id2 < id1;
            let key = if flip { (id2, id1) } else { (id1, id2) };

            let mut manifold = ContactManifold {
                normal: Vec3::ZERO,
                penetration_depth: 0.0,
                points: Vec::new(),
            };
            if let Some(m) = pair.manifolds.iter().find(|m| !m.data.solver_contacts.is_empty()) {
                let normal = from_vector(&m.data.normal);
                manifold.normal = if flip { -normal } else { normal };
                for contact in &m.data.solver_contacts {
                    manifold.points.push(from_vector(&contact.point));
                    manifold.penetration_depth = manifold.penetration_depth.max(-contact.dist);
                }
            }
            pairs.insert(key, manifold);
        }
        (pairs, num_manifolds)
    }
}

// ============================================================================
// 创建与接口代理
// ============================================================================

pub fn create(
    max_bodies: u32,
    num_body_mutexes: u32,
    max_body_pairs: u32,
    max_contact_constraints: u32,
    bp_interface_va: u64,
    ovb_filter_va: u64,
    ovo_filter_va: u64,
) -> Result<u64, NativeFault> {
    let layers = LayerTables::snapshot(bp_interface_va, ovb_filter_va, ovo_filter_va)?;
    let num_stripes = if num_body_mutexes == 0 { 64 } else { num_body_mutexes as usize };

    let system_va = heap::alloc(NativeSystem {
        max_bodies,
        max_body_pairs,
        max_contact_constraints,
        bp_interface: bp_interface_va,
        ovb_filter: ovb_filter_va,
        ovo_filter: ovo_filter_va,
        contact_listener: 0,
        layers,
        world: World::new(),
        slots: Vec::new(),
        free_indices: Vec::new(),
        num_bodies: 0,
        locks: BodyLocks::new(num_stripes),
        interfaces: [0; 4],
        constraints: Vec::new(),
        joints: HashMap::new(),
        active_pairs: BTreeSet::new(),
    });
    let interfaces = [
        heap::alloc(NativeBodyInterface { system: system_va, locking: true }),
        heap::alloc(NativeBodyInterface { system: system_va, locking: false }),
        heap::alloc(NativeBodyLockInterface { system: system_va, locking: true }),
        heap::alloc(NativeBodyLockInterface { system: system_va, locking: false }),
    ];
    heap::with_mut::<NativeSystem, _>(system_va, |s| s.interfaces = interfaces)?;
    log::info!(
        "[物理系统] 创建 @ {:#x}: 最大刚体 {}, 最大刚体对 {}, 最大接触约束 {}",
        system_va,
        max_bodies,
        max_body_pairs,
        max_contact_constraints
    );
    Ok(system_va)
}

fn with_system<R>(system_va: u64, f: impl FnOnce(&NativeSystem) -> R) -> Result<R, NativeFault> {
    heap::with::<NativeSystem, _>(system_va, f)
}

fn with_system_mut<R>(system_va: u64, f: impl FnOnce(&mut NativeSystem) -> R) -> Result<R, NativeFault> {
    heap::with_mut::<NativeSystem, _>(system_va, f)
}

/// 刚体接口代理地址
pub fn body_interface(system_va: u64, locking: bool) -> Result<u64, NativeFault> {
    with_system(system_va, |s| if locking { s.interfaces[0] } else { s.interfaces[1] })
}

pub fn body_lock_interface(system_va: u64, locking: bool) -> Result<u64, NativeFault> {
    with_system(system_va, |s| if locking { s.interfaces[2] } else { s.interfaces[3] })
}

/// 刚体接口代理 → (系统地址, 是否加锁)
pub fn interface_target(interface_va: u64) -> Result<(u64, bool), NativeFault> {
    heap::with::<NativeBodyInterface, _>(interface_va, |i| (i.system, i.locking))
}

pub fn lock_interface_target(interface_va: u64) -> Result<(u64, bool), NativeFault> {
    heap::with::<NativeBodyLockInterface, _>(interface_va, |i| (i.system, i.locking))
}

pub fn body_locks(system_va: u64) -> Result<Arc<BodyLocks>, NativeFault> {
    with_system(system_va, |s| Arc::clone(&s.locks))
}

/// 获取刚体所在条带的锁；必须在不持有系统槽位时调用
pub fn lock_body(system_va: u64, id: BodyId, write: bool) -> Result<StripeGuard, NativeFault> {
    let locks = body_locks(system_va)?;
    Ok(if write { locks.write(id.index()) } else { locks.read(id.index()) })
}

// ============================================================================
// 全局参数
// ============================================================================

pub fn set_gravity(system_va: u64, gravity: Vec3) -> Result<(), NativeFault> {
    with_system_mut(system_va, |s| s.world.gravity = to_vector(gravity))
}

pub fn gravity(system_va: u64) -> Result<Vec3, NativeFault> {
    with_system(system_va, |s| from_vector(&s.world.gravity))
}

pub fn num_bodies(system_va: u64) -> Result<u32, NativeFault> {
    with_system(system_va, |s| s.num_bodies)
}

pub fn num_active_bodies(system_va: u64) -> Result<u32, NativeFault> {
    with_system(system_va, |s| s.records().filter(|r| s.is_active(r)).count() as u32)
}

pub fn max_bodies(system_va: u64) -> Result<u32, NativeFault> {
    with_system(system_va, |s| s.max_bodies)
}

/// 已加入系统的刚体
pub fn body_ids(system_va: u64) -> Result<Vec<BodyId>, NativeFault> {
    with_system(system_va, |s| s.records().filter(|r| r.is_added()).map(|r| r.id).collect())
}

pub fn active_body_ids(system_va: u64) -> Result<Vec<BodyId>, NativeFault> {
    with_system(system_va, |s| s.records().filter(|r| s.is_active(r)).map(|r| r.id).collect())
}

/// Rapier 的宽相无需手动重建，这里只记录调用
pub fn optimize_broad_phase(system_va: u64) -> Result<(), NativeFault> {
    with_system(system_va, |s| {
        log::debug!("[物理系统] 优化宽相: {} 个刚体", s.num_bodies);
    })
}

pub fn set_contact_listener(system_va: u64, listener_va: u64) -> Result<u64, NativeFault> {
    with_system_mut(system_va, |s| std::mem::replace(&mut s.contact_listener, listener_va))
}

pub fn contact_listener(system_va: u64) -> Result<u64, NativeFault> {
    with_system(system_va, |s| s.contact_listener)
}

// ============================================================================
// 刚体注册表
// ============================================================================

/// 按设置地址创建刚体（未加入系统），返回刚体代理地址；容量已满或形状无效时返回 0
pub fn create_body(system_va: u64, settings_va: u64) -> Result<u64, NativeFault> {
    let data = body::settings_data(settings_va)?;
    create_body_from_data(system_va, &data)
}

pub fn create_body_from_data(system_va: u64, data: &BodySettingsData) -> Result<u64, NativeFault> {
    let full = with_system(system_va, |s| s.num_bodies >= s.max_bodies)?;
    if full {
        log::warn!("[物理系统] 刚体数量已达上限，创建失败");
        return Ok(0);
    }
    let shape_va = match data.resolve_shape() {
        Ok(shape_va) => shape_va,
        Err(error) => {
            log::warn!("[物理系统] 刚体形状无效: {}", error);
            return Ok(0);
        }
    };
    let (shared, density) = shape::with_shape(shape_va, |s| (s.shared.clone(), s.density))?;

    let body_type = match data.motion_type {
        MotionType::Static => RigidBodyType::Fixed,
        MotionType::Kinematic => RigidBodyType::KinematicPositionBased,
        MotionType::Dynamic => RigidBodyType::Dynamic,
    };

    let created = with_system_mut(system_va, |s| {
        // 加锁后再检查一次，避免并发创建越过上限
        if s.num_bodies >= s.max_bodies {
            return None;
        }
        let id = s.allocate_id()?;
        let rb = RigidBodyBuilder::new(body_type)
            .pose(to_pose(data.position, data.rotation))
            .linvel(to_vector(data.linear_velocity))
            .angvel(to_vector(data.angular_velocity))
            .linear_damping(data.linear_damping)
            .angular_damping(data.angular_damping)
            .gravity_scale(data.gravity_factor)
            .can_sleep(data.allow_sleeping)
            .user_data(id.raw() as u128)
            .build();
        let groups = s.layers.groups(data.object_layer);
        let hooks = if data.collision_group.filter != 0 {
            ActiveHooks::FILTER_CONTACT_PAIRS
        } else {
            ActiveHooks::empty()
        };
        let collider = ColliderBuilder::new(shared)
            .density(density)
            .friction(data.friction)
            .restitution(data.restitution)
            .sensor(data.is_sensor)
            .collision_groups(groups)
            .solver_groups(groups)
            .active_hooks(hooks)
            .user_data(id.raw() as u128)
            .build();
        let proxy = heap::alloc(NativeBody { system: system_va, id });
        s.slots[id.index() as usize].record = Some(BodyRecord {
            id,
            proxy,
            motion_type: data.motion_type,
            object_layer: data.object_layer,
            collision_group: data.collision_group,
            shape: shape_va,
            user_data: data.user_data,
            placement: Placement::Detached {
                body: Box::new(rb),
                collider: Box::new(collider),
            },
        });
        s.num_bodies += 1;
        Some(proxy)
    })?;

    match created {
        Some(proxy) => Ok(proxy),
        None => {
            heap::release_ref(shape_va)?;
            log::warn!("[物理系统] 刚体数量已达上限，创建失败");
            Ok(0)
        }
    }
}

/// 刚体代理地址
pub fn body_proxy(system_va: u64, id: BodyId) -> Result<Option<u64>, NativeFault> {
    with_system(system_va, |s| s.record(id).map(|r| r.proxy))
}

/// 将刚体加入模拟；刚体不存在或已加入时返回 false
pub fn add_body(system_va: u64, id: BodyId, activation: Activation) -> Result<bool, NativeFault> {
    with_system_mut(system_va, |s| {
        let Some(record) = s.record_mut(id) else {
            return false;
        };
        if record.is_added() {
            return false;
        }
        let detached = std::mem::replace(
            &mut record.placement,
            Placement::Simulated {
                body: RigidBodyHandle::invalid(),
                collider: ColliderHandle::invalid(),
            },
        );
        let Placement::Detached { body, collider } = detached else {
            return false;
        };
        let motion_type = record.motion_type;

        let world = &mut s.world;
        let body_handle = world.bodies.insert(*body);
        let collider_handle = world.colliders.insert_with_parent(*collider, body_handle, &mut world.bodies);
        if let Some(rb) = world.bodies.get_mut(body_handle) {
            match activation {
                Activation::Activate => rb.wake_up(true),
                Activation::DontActivate if motion_type != MotionType::Static => rb.sleep(),
                Activation::DontActivate => {}
            }
        }
        if let Some(record) = s.record_mut(id) {
            record.placement = Placement::Simulated {
                body: body_handle,
                collider: collider_handle,
            };
        }
        s.sync_all_constraints();
        true
    })
}

/// 将刚体移出模拟（刚体本身保留）；刚体不存在或未加入时返回 false
pub fn remove_body(system_va: u64, id: BodyId) -> Result<bool, NativeFault> {
    with_system_mut(system_va, |s| {
        let Some((body_handle, collider_handle)) = s.record(id).and_then(|r| match r.placement {
            Placement::Simulated { body, collider } => Some((body, collider)),
            Placement::Detached { .. } => None,
        }) else {
            return false;
        };
        s.detach_joints_of(id);

        let world = &mut s.world;
        let collider = world
            .colliders
            .remove(collider_handle, &mut world.islands, &mut world.bodies, false);
        let body = world.bodies.remove(
            body_handle,
            &mut world.islands,
            &mut world.colliders,
            &mut world.impulse_joints,
            &mut world.multibody_joints,
            true,
        );
        let (Some(body), Some(collider)) = (body, collider) else {
            log::error!("[物理系统] 刚体 {} 的 Rapier 对象缺失", id);
            return false;
        };
        if let Some(record) = s.record_mut(id) {
            record.placement = Placement::Detached {
                body: Box::new(body),
                collider: Box::new(collider),
            };
        }
        true
    })
}

/// 销毁未加入系统的刚体；刚体仍在系统中时返回 false
pub fn destroy_body(system_va: u64, id: BodyId) -> Result<bool, NativeFault> {
    let removed = with_system_mut(system_va, |s| {
        let index = id.index() as usize;
        match s.record(id) {
            Some(record) if !record.is_added() => {}
            _ => return None,
        }
        let record = s.slots[index].record.take()?;
        s.free_indices.push(id.index());
        s.num_bodies -= 1;
        Some((record.proxy, record.shape))
    })?;
    let Some((proxy, shape_va)) = removed else {
        return Ok(false);
    };
    heap::free(proxy)?;
    heap::release_ref(shape_va)?;
    Ok(true)
}

/// 经由刚体代理销毁；系统已释放时什么都不做
pub fn destroy_body_by_proxy(proxy_va: u64) -> Result<bool, NativeFault> {
    if !heap::is_live(proxy_va) {
        log::debug!("[物理系统] 刚体代理 {:#x} 已随物理系统释放", proxy_va);
        return Ok(false);
    }
    let (system_va, id) = body::body_location(proxy_va)?;
    let destroyed = destroy_body(system_va, id)?;
    if !destroyed {
        log::warn!("[物理系统] 刚体 {} 仍在系统中，无法销毁", id);
    }
    Ok(destroyed)
}

pub fn body_state(system_va: u64, id: BodyId) -> Result<Option<BodyState>, NativeFault> {
    with_system(system_va, |s| {
        s.record(id).map(|r| {
            if !r.is_added() {
                BodyState::Unregistered
            } else if s.is_active(r) {
                BodyState::RegisteredActive
            } else {
                BodyState::RegisteredInactive
            }
        })
    })
}

pub fn is_added(system_va: u64, id: BodyId) -> Result<bool, NativeFault> {
    with_system(system_va, |s| s.record(id).is_some_and(|r| r.is_added()))
}

pub fn is_active(system_va: u64, id: BodyId) -> Result<bool, NativeFault> {
    with_system(system_va, |s| s.record(id).is_some_and(|r| s.is_active(r)))
}

// ============================================================================
// 刚体读写
// ============================================================================

/// 只读访问刚体；刚体不存在时返回 `None`
pub fn read_body<R>(
    system_va: u64,
    id: BodyId,
    f: impl FnOnce(&BodyRecord, &RigidBody) -> R,
) -> Result<Option<R>, NativeFault> {
    with_system(system_va, |s| {
        let record = s.record(id)?;
        let rb = s.rigid_body(record)?;
        Some(f(record, rb))
    })
}

/// 可写访问刚体与其碰撞体；刚体不存在时返回 `None`
pub fn write_body<R>(
    system_va: u64,
    id: BodyId,
    f: impl FnOnce(&mut RigidBody, &mut Collider, MotionType) -> R,
) -> Result<Option<R>, NativeFault> {
    with_system_mut(system_va, |s| s.body_parts_mut(id).map(|(rb, co, mt)| f(rb, co, mt)))
}

/// (位姿, 质心世界坐标)
pub fn body_pose(system_va: u64, id: BodyId) -> Result<Option<(Pose, DVec3)>, NativeFault> {
    read_body(system_va, id, |_, rb| {
        let com = rb.center_of_mass();
        (*rb.position(), DVec3::new(com.x as f64, com.y as f64, com.z as f64))
    })
}

pub fn position(system_va: u64, id: BodyId) -> Result<Option<DVec3>, NativeFault> {
    read_body(system_va, id, |_, rb| from_pose(rb.position()).0)
}

pub fn rotation(system_va: u64, id: BodyId) -> Result<Option<Quat>, NativeFault> {
    read_body(system_va, id, |_, rb| from_pose(rb.position()).1)
}

pub fn center_of_mass_position(system_va: u64, id: BodyId) -> Result<Option<DVec3>, NativeFault> {
    Ok(body_pose(system_va, id)?.map(|(_, com)| com))
}

pub fn world_transform(system_va: u64, id: BodyId) -> Result<Option<DMat4>, NativeFault> {
    read_body(system_va, id, |_, rb| pose_to_dmat4(rb.position()))
}

pub fn linear_velocity(system_va: u64, id: BodyId) -> Result<Option<Vec3>, NativeFault> {
    read_body(system_va, id, |_, rb| {
        let v = rb.linvel();
        Vec3::new(v.x, v.y, v.z)
    })
}

pub fn angular_velocity(system_va: u64, id: BodyId) -> Result<Option<Vec3>, NativeFault> {
    read_body(system_va, id, |_, rb| {
        let w = rb.angvel();
        Vec3::new(w.x, w.y, w.z)
    })
}

pub fn set_position_and_rotation(
    system_va: u64,
    id: BodyId,
    position: DVec3,
    rotation: Quat,
    activation: Activation,
) -> Result<bool, NativeFault> {
    let wake = activation == Activation::Activate;
    let done = write_body(system_va, id, |rb, _, motion_type| {
        let pose = to_pose(position, rotation);
        if motion_type == MotionType::Kinematic {
            rb.set_next_kinematic_position(pose);
        }
        rb.set_position(pose, wake && motion_type != MotionType::Static);
    })?;
    Ok(done.is_some())
}

pub fn set_linear_velocity(system_va: u64, id: BodyId, velocity: Vec3) -> Result<bool, NativeFault> {
    let done = write_body(system_va, id, |rb, _, motion_type| {
        if motion_type != MotionType::Static {
            rb.set_linvel(to_vector(velocity), true);
        }
    })?;
    Ok(done.is_some())
}

pub fn set_angular_velocity(system_va: u64, id: BodyId, velocity: Vec3) -> Result<bool, NativeFault> {
    let done = write_body(system_va, id, |rb, _, motion_type| {
        if motion_type != MotionType::Static {
            rb.set_angvel(to_vector(velocity), true);
        }
    })?;
    Ok(done.is_some())
}

pub fn add_force(system_va: u64, id: BodyId, force: Vec3) -> Result<bool, NativeFault> {
    Ok(write_body(system_va, id, |rb, _, _| rb.add_force(to_vector(force), true))?.is_some())
}

pub fn add_impulse(system_va: u64, id: BodyId, impulse: Vec3) -> Result<bool, NativeFault> {
    Ok(write_body(system_va, id, |rb, _, _| rb.apply_impulse(to_vector(impulse), true))?.is_some())
}

pub fn activate_body(system_va: u64, id: BodyId) -> Result<bool, NativeFault> {
    Ok(write_body(system_va, id, |rb, _, _| rb.wake_up(true))?.is_some())
}

pub fn deactivate_body(system_va: u64, id: BodyId) -> Result<bool, NativeFault> {
    Ok(write_body(system_va, id, |rb, _, _| rb.sleep())?.is_some())
}

pub fn set_motion_type(
    system_va: u64,
    id: BodyId,
    motion_type: MotionType,
    activation: Activation,
) -> Result<bool, NativeFault> {
    let body_type = match motion_type {
        MotionType::Static => RigidBodyType::Fixed,
        MotionType::Kinematic => RigidBodyType::KinematicPositionBased,
        MotionType::Dynamic => RigidBodyType::Dynamic,
    };
    with_system_mut(system_va, |s| {
        let Some((rb, _, _)) = s.body_parts_mut(id) else {
            return false;
        };
        rb.set_body_type(body_type, activation == Activation::Activate);
        if let Some(record) = s.record_mut(id) {
            record.motion_type = motion_type;
        }
        true
    })
}

pub fn set_friction(system_va: u64, id: BodyId, friction: f32) -> Result<bool, NativeFault> {
    Ok(write_body(system_va, id, |_, co, _| co.set_friction(friction))?.is_some())
}

pub fn set_restitution(system_va: u64, id: BodyId, restitution: f32) -> Result<bool, NativeFault> {
    Ok(write_body(system_va, id, |_, co, _| co.set_restitution(restitution))?.is_some())
}

pub fn set_gravity_factor(system_va: u64, id: BodyId, factor: f32) -> Result<bool, NativeFault> {
    Ok(write_body(system_va, id, |rb, _, _| rb.set_gravity_scale(factor, true))?.is_some())
}

pub fn set_user_data(system_va: u64, id: BodyId, user_data: u64) -> Result<bool, NativeFault> {
    with_system_mut(system_va, |s| match s.record_mut(id) {
        Some(record) => {
            record.user_data = user_data;
            true
        }
        None => false,
    })
}

/// 修改刚体的碰撞组；`group.filter` 为裸地址
pub fn set_collision_group(system_va: u64, id: BodyId, group: CollisionGroupData) -> Result<bool, NativeFault> {
    with_system_mut(system_va, |s| {
        let Some((_, co, _)) = s.body_parts_mut(id) else {
            return false;
        };
        co.set_active_hooks(if group.filter != 0 {
            ActiveHooks::FILTER_CONTACT_PAIRS
        } else {
            ActiveHooks::empty()
        });
        if let Some(record) = s.record_mut(id) {
            record.collision_group = group;
        }
        true
    })
}

// ============================================================================
// 约束注册表
// ============================================================================

pub fn add_constraint(system_va: u64, constraint_va: u64) -> Result<bool, NativeFault> {
    let added = with_system_mut(system_va, |s| {
        if s.constraints.contains(&constraint_va) {
            return Ok(false);
        }
        heap::add_ref(constraint_va)?;
        s.constraints.push(constraint_va);
        s.sync_constraint(constraint_va)?;
        Ok(true)
    })??;
    if added {
        super::constraint::set_system(constraint_va, system_va)?;
    }
    Ok(added)
}

pub fn remove_constraint(system_va: u64, constraint_va: u64) -> Result<bool, NativeFault> {
    let removed = with_system_mut(system_va, |s| {
        let Some(pos) = s.constraints.iter().position(|&c| c == constraint_va) else {
            return false;
        };
        s.constraints.remove(pos);
        if let Some((joint_handle, ..)) = s.joints.remove(&constraint_va) {
            s.world.impulse_joints.remove(joint_handle, true);
        }
        true
    })?;
    if removed {
        super::constraint::set_system(constraint_va, 0)?;
        heap::release_ref(constraint_va)?;
    }
    Ok(removed)
}

pub fn sync_constraint(system_va: u64, constraint_va: u64) -> Result<(), NativeFault> {
    with_system_mut(system_va, |s| s.sync_constraint(constraint_va))?
}

pub fn num_constraints(system_va: u64) -> Result<usize, NativeFault> {
    with_system(system_va, |s| s.constraints.len())
}

// ============================================================================
// 步进
// ============================================================================

/// 推进模拟，阻塞直到所有子步完成，返回容量警告位掩码
pub fn update(
    system_va: u64,
    delta_time: f32,
    collision_steps: u32,
    temp_allocator_va: u64,
    job_system_va: u64,
) -> Result<u32, NativeFault> {
    let capacity = job::capacity(temp_allocator_va)?;
    let pool = job::pool(job_system_va)?;
    if delta_time <= 0.0 {
        return Ok(0);
    }
    let config = get_config();
    let steps = collision_steps.max(1);
    let dt = delta_time / steps as f32;

    let (mask, listener_va, events) = with_system_mut(system_va, |s| {
        let hooks = s.group_hooks();
        let world = &mut s.world;
        pool.install(|| {
            for _ in 0..steps {
                world.step(dt, &hooks);
            }
        });

        let (pairs, num_manifolds) = s.collect_contacts();
        let mut mask = 0;
        let temp_bytes = s.num_bodies as usize * config.bytes_per_body + num_manifolds * config.bytes_per_manifold;
        if temp_bytes > capacity {
            mask |= MANIFOLD_CACHE_FULL;
        }
        if pairs.len() > s.max_body_pairs as usize {
            mask |= BODY_PAIR_CACHE_FULL;
        }
        if num_manifolds > s.max_contact_constraints as usize {
            mask |= CONTACT_CONSTRAINTS_FULL;
        }

        let mut events = Vec::new();
        if s.contact_listener != 0 {
            for (&(a, b), manifold) in &pairs {
                if s.active_pairs.contains(&(a, b)) {
                    events.push(ContactEvent::Persisted(a, b, manifold.clone()));
                } else {
                    events.push(ContactEvent::Added(a, b, manifold.clone()));
                }
            }
            for &(a, b) in s.active_pairs.iter().filter(|k| !pairs.contains_key(*k)) {
                events.push(ContactEvent::Removed(a, b));
            }
        }
        s.active_pairs = pairs.into_keys().collect();
        (mask, s.contact_listener, events)
    })?;

    if mask != 0 {
        log::warn!("[物理系统] 步进容量不足, 错误掩码 {:#x}", mask);
    }
    if listener_va != 0 && !events.is_empty() {
        match listener::callbacks(listener_va) {
            Ok(callbacks) => listener::dispatch(callbacks.as_ref(), &events),
            Err(fault) => log::error!("[物理系统] 接触监听器不可用: {}", fault),
        }
    }
    Ok(mask)
}

// ============================================================================
// 射线查询
// ============================================================================

/// 沿 `direction` 投射射线，返回最近命中的刚体与命中比例（0..=1，按 `direction` 长度计）
///
/// 只查询已加入系统的刚体；形状按实心处理，起点在形状内部时比例为 0。
pub fn cast_ray(system_va: u64, origin: DVec3, direction: Vec3) -> Result<Option<(BodyId, f32)>, NativeFault> {
    with_system(system_va, |s| {
        let world = &s.world;
        let query = world.broad_phase.as_query_pipeline(
            world.narrow_phase.query_dispatcher(),
            &world.bodies,
            &world.colliders,
            QueryFilter::default(),
        );
        let ray = Ray::new(to_vector(origin.as_vec3()), to_vector(direction));
        query.cast_ray(&ray, 1.0, true).and_then(|(handle, fraction)| {
            let collider = world.colliders.get(handle)?;
            Some((BodyId::from_raw(collider.user_data as u32), fraction))
        })
    })
}
