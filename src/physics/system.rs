//! 物理系统与刚体接口
//!
//! `PhysicsSystem` 拥有原生系统，并保活创建时传入的三张层表与接触监听器。
//! 刚体注册表的操作在 `BodyInterface` 上：加锁版本每次调用都获取刚体所在的锁条带，
//! 不加锁版本由调用者自行保证独占（例如已经持有 `BodyLockWrite`）。

use std::sync::Arc;

use glam::{DMat4, DVec3, Quat, Vec3};

use crate::config::get_config;
use crate::lifetime::retention::{self, Relation};
use crate::lifetime::wrapper::{free_object, native_wrapper};
use crate::lifetime::NativeWrapper;
use crate::native::lock::StripeGuard;
use crate::native::query as native_query;
use crate::native::system as native_system;
use crate::readonly::{BodyState, ConstBody, EActivation, EMotionType};
use crate::{check_dvec3, check_finite, check_quat, check_vec3, BridgeError, Result};

use super::body::{Body, BodyCreationSettings, BodyId};
use super::constraint::Constraint;
use super::filter::{
    BroadPhaseLayerInterfaceTable, GroupFilterTable, ObjectLayerPairFilterTable, ObjectVsBroadPhaseLayerFilterTable,
};
use super::job::{JobSystemThreadPool, TempAllocatorImpl};
use super::listener::CustomContactListener;
use super::query::ClosestHitCastRayCollector;

/// 一次步进的容量警告位掩码；为 0 表示一切正常
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysicsUpdateError(pub u32);

impl PhysicsUpdateError {
    pub const NONE: PhysicsUpdateError = PhysicsUpdateError(0);
    /// 临时分配器放不下本次步进的接触数据
    pub const MANIFOLD_CACHE_FULL: PhysicsUpdateError = PhysicsUpdateError(native_system::MANIFOLD_CACHE_FULL);
    /// 接触中的刚体对超过 `max_body_pairs`
    pub const BODY_PAIR_CACHE_FULL: PhysicsUpdateError = PhysicsUpdateError(native_system::BODY_PAIR_CACHE_FULL);
    /// 接触流形超过 `max_contact_constraints`
    pub const CONTACT_CONSTRAINTS_FULL: PhysicsUpdateError =
        PhysicsUpdateError(native_system::CONTACT_CONSTRAINTS_FULL);

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: PhysicsUpdateError) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

native_wrapper!(
    /// 物理系统
    PhysicsSystem,
    "PhysicsSystem",
    free_object
);

impl PhysicsSystem {
    /// 创建物理系统；`num_body_mutexes` 为 0 时使用默认条带数
    pub fn new(
        max_bodies: u32,
        num_body_mutexes: u32,
        max_body_pairs: u32,
        max_contact_constraints: u32,
        bp_interface: &BroadPhaseLayerInterfaceTable,
        ovb_filter: &ObjectVsBroadPhaseLayerFilterTable,
        ovo_filter: &ObjectLayerPairFilterTable,
    ) -> Result<Self> {
        let va = native_system::create(
            max_bodies,
            num_body_mutexes,
            max_body_pairs,
            max_contact_constraints,
            bp_interface.va()?,
            ovb_filter.va()?,
            ovo_filter.va()?,
        )?;
        let system = Self::adopt(va);
        retention::retain(&system, Relation::BROAD_PHASE_LAYER_INTERFACE, bp_interface);
        retention::retain(&system, Relation::OBJECT_VS_BROAD_PHASE_FILTER, ovb_filter);
        retention::retain(&system, Relation::OBJECT_LAYER_PAIR_FILTER, ovo_filter);
        native_system::set_gravity(va, Vec3::from_array(get_config().default_gravity))?;
        Ok(system)
    }

    pub fn body_interface(&self) -> Result<BodyInterface> {
        let va = native_system::body_interface(self.va()?, true)?;
        Ok(BodyInterface::contained(va, self))
    }

    pub fn body_interface_no_lock(&self) -> Result<BodyInterface> {
        let va = native_system::body_interface(self.va()?, false)?;
        Ok(BodyInterface::contained(va, self))
    }

    pub fn body_lock_interface(&self) -> Result<BodyLockInterface> {
        let va = native_system::body_lock_interface(self.va()?, true)?;
        Ok(BodyLockInterface::contained(va, self))
    }

    pub fn body_lock_interface_no_lock(&self) -> Result<BodyLockInterface> {
        let va = native_system::body_lock_interface(self.va()?, false)?;
        Ok(BodyLockInterface::contained(va, self))
    }

    pub fn set_gravity(&self, gravity: Vec3) -> Result<()> {
        check_vec3("gravity", gravity)?;
        Ok(native_system::set_gravity(self.va()?, gravity)?)
    }

    pub fn gravity(&self) -> Result<Vec3> {
        Ok(native_system::gravity(self.va()?)?)
    }

    pub fn num_bodies(&self) -> Result<u32> {
        Ok(native_system::num_bodies(self.va()?)?)
    }

    pub fn num_active_bodies(&self) -> Result<u32> {
        Ok(native_system::num_active_bodies(self.va()?)?)
    }

    pub fn max_bodies(&self) -> Result<u32> {
        Ok(native_system::max_bodies(self.va()?)?)
    }

    /// 已加入系统的刚体
    pub fn body_ids(&self) -> Result<Vec<BodyId>> {
        Ok(native_system::body_ids(self.va()?)?)
    }

    pub fn active_body_ids(&self) -> Result<Vec<BodyId>> {
        Ok(native_system::active_body_ids(self.va()?)?)
    }

    pub fn optimize_broad_phase(&self) -> Result<()> {
        Ok(native_system::optimize_broad_phase(self.va()?)?)
    }

    pub fn set_contact_listener(&self, listener: &CustomContactListener) -> Result<()> {
        native_system::set_contact_listener(self.va()?, listener.va()?)?;
        retention::retain(self, Relation::CONTACT_LISTENER, listener);
        Ok(())
    }

    pub fn clear_contact_listener(&self) -> Result<()> {
        native_system::set_contact_listener(self.va()?, 0)?;
        retention::release_hold(self, Relation::CONTACT_LISTENER);
        Ok(())
    }

    pub fn contact_listener(&self) -> Option<CustomContactListener> {
        retention::retained(self, Relation::CONTACT_LISTENER)
    }

    /// 注册表持有约束的一次计数；已加入时返回 false
    pub fn add_constraint(&self, constraint: &Constraint) -> Result<bool> {
        let added = native_system::add_constraint(self.va()?, constraint.va()?)?;
        if !added {
            log::debug!("[物理系统] 约束 {} 已在系统中", constraint.handle());
        }
        Ok(added)
    }

    pub fn remove_constraint(&self, constraint: &Constraint) -> Result<bool> {
        Ok(native_system::remove_constraint(self.va()?, constraint.va()?)?)
    }

    pub fn num_constraints(&self) -> Result<usize> {
        Ok(native_system::num_constraints(self.va()?)?)
    }

    /// 推进模拟，阻塞到所有子步完成；容量不足只体现在返回的位掩码里
    pub fn update(
        &self,
        delta_time: f32,
        collision_steps: u32,
        temp_allocator: &TempAllocatorImpl,
        job_system: &JobSystemThreadPool,
    ) -> Result<PhysicsUpdateError> {
        check_finite("delta time", &[delta_time as f64])?;
        if collision_steps == 0 {
            return Err(BridgeError::InvalidArgument("collision steps must be at least 1".to_owned()));
        }
        let mask = native_system::update(
            self.va()?,
            delta_time,
            collision_steps,
            temp_allocator.va()?,
            job_system.va()?,
        )?;
        Ok(PhysicsUpdateError(mask))
    }

    /// 从 `origin` 沿 `direction` 投射射线（长度即 `direction` 的长度），结果累积到收集器
    ///
    /// 只命中已加入系统的刚体，返回这次投射是否命中。
    pub fn cast_ray(&self, origin: DVec3, direction: Vec3, collector: &ClosestHitCastRayCollector) -> Result<bool> {
        check_dvec3("ray origin", origin)?;
        check_vec3("ray direction", direction)?;
        Ok(native_query::cast_ray(self.va()?, origin, direction, collector.va()?)?)
    }
}

// ============================================================================
// 刚体接口
// ============================================================================

fn system_of<W: NativeWrapper>(wrapper: &W) -> Result<PhysicsSystem> {
    wrapper
        .core()
        .container()
        .map(|core| PhysicsSystem::from_core(Arc::clone(core)))
        .ok_or(BridgeError::InvalidHandle { kind: W::TYPE_NAME })
}

fn found<T>(value: Option<T>) -> Result<T> {
    value.ok_or(BridgeError::InvalidHandle { kind: "Body" })
}

fn done(ok: bool) -> Result<()> {
    found(ok.then_some(()))
}

native_wrapper!(
    /// 刚体接口（位于物理系统内部）
    BodyInterface,
    "BodyInterface",
    free_object
);

impl BodyInterface {
    fn target(&self) -> Result<(u64, bool)> {
        Ok(native_system::interface_target(self.va()?)?)
    }

    /// 加锁版本先取得刚体所在条带，再访问系统
    fn guarded<R>(&self, id: BodyId, write: bool, f: impl FnOnce(u64) -> Result<R>) -> Result<R> {
        let (system_va, locking) = self.target()?;
        let _guard = if locking {
            Some(native_system::lock_body(system_va, id, write)?)
        } else {
            None
        };
        f(system_va)
    }

    pub fn system(&self) -> Result<PhysicsSystem> {
        system_of(self)
    }

    pub fn is_locking(&self) -> Result<bool> {
        Ok(self.target()?.1)
    }

    /// 创建刚体但不加入模拟，返回拥有它的包装；容量已满或形状无效时返回 `None`
    pub fn create_body(&self, settings: &BodyCreationSettings) -> Result<Option<Body>> {
        let system = self.system()?;
        let proxy = native_system::create_body(system.va()?, settings.va()?)?;
        if proxy == 0 {
            return Ok(None);
        }
        let filter: Option<GroupFilterTable> = retention::retained(settings, Relation::GROUP_FILTER);
        let body = Body::owned(proxy, &system, filter);
        log::debug!("[刚体接口] 创建刚体 {}", body.id()?);
        Ok(Some(body))
    }

    /// 加入模拟；刚体的所有权转给系统
    pub fn add_body(&self, body: &Body, activation: EActivation) -> Result<()> {
        let (system_va, id) = self.locate(body)?;
        if !body.owns_native_object() {
            return Err(BridgeError::OwnershipViolation(format!(
                "body {} is not owned by this wrapper",
                id
            )));
        }
        let added = self.guarded(id, true, |_| Ok(native_system::add_body(system_va, id, activation)?))?;
        done(added)?;
        body.core().record().disown();
        Ok(())
    }

    /// 移出模拟；所有权回到传入的包装
    pub fn remove_body(&self, body: &Body) -> Result<()> {
        let (system_va, id) = self.locate(body)?;
        let removed = self.guarded(id, true, |_| Ok(native_system::remove_body(system_va, id)?))?;
        if !removed {
            return Err(BridgeError::OwnershipViolation(format!("body {} is not in the system", id)));
        }
        body.core().record().regain(Box::new(|handle| Body::free_native(handle.va())));
        Ok(())
    }

    /// 显式销毁未加入模拟的刚体
    pub fn destroy_body(&self, body: &Body) -> Result<()> {
        let (system_va, id) = self.locate(body)?;
        if !body.owns_native_object() {
            return Err(BridgeError::OwnershipViolation(format!(
                "body {} must be removed from the system before it is destroyed",
                id
            )));
        }
        let destroyed = self.guarded(id, true, |_| Ok(native_system::destroy_body(system_va, id)?))?;
        if !destroyed {
            return Err(BridgeError::OwnershipViolation(format!("body {} is still in the system", id)));
        }
        body.core().record().take();
        body.core().keep_alive().clear();
        Ok(())
    }

    /// 创建并加入；包装随即交出所有权，只返回刚体编号
    pub fn create_and_add_body(&self, settings: &BodyCreationSettings, activation: EActivation) -> Result<Option<BodyId>> {
        let Some(body) = self.create_body(settings)? else {
            return Ok(None);
        };
        let id = body.id()?;
        self.add_body(&body, activation)?;
        Ok(Some(id))
    }

    /// 刚体的非拥有视图
    pub fn body(&self, id: BodyId) -> Result<Option<Body>> {
        let system = self.system()?;
        let proxy = native_system::body_proxy(system.va()?, id)?;
        Ok(proxy.map(|proxy| Body::view(proxy, &system)))
    }

    /// 刚体必须属于本接口所在的系统
    fn locate(&self, body: &Body) -> Result<(u64, BodyId)> {
        let (system_va, id) = body.location()?;
        let (own_va, _) = self.target()?;
        if system_va != own_va {
            return Err(BridgeError::InvalidArgument(format!(
                "body {} belongs to another physics system",
                id
            )));
        }
        Ok((system_va, id))
    }

    pub fn body_state(&self, id: BodyId) -> Result<BodyState> {
        self.guarded(id, false, |sys| Ok(native_system::body_state(sys, id)?))
            .map(|state| state.unwrap_or(BodyState::Unregistered))
    }

    pub fn is_added(&self, id: BodyId) -> Result<bool> {
        self.guarded(id, false, |sys| Ok(native_system::is_added(sys, id)?))
    }

    pub fn is_active(&self, id: BodyId) -> Result<bool> {
        self.guarded(id, false, |sys| Ok(native_system::is_active(sys, id)?))
    }

    pub fn activate_body(&self, id: BodyId) -> Result<()> {
        self.guarded(id, true, |sys| done(native_system::activate_body(sys, id)?))
    }

    pub fn deactivate_body(&self, id: BodyId) -> Result<()> {
        self.guarded(id, true, |sys| done(native_system::deactivate_body(sys, id)?))
    }

    pub fn position(&self, id: BodyId) -> Result<DVec3> {
        self.guarded(id, false, |sys| found(native_system::position(sys, id)?))
    }

    pub fn rotation(&self, id: BodyId) -> Result<Quat> {
        self.guarded(id, false, |sys| found(native_system::rotation(sys, id)?))
    }

    pub fn center_of_mass_position(&self, id: BodyId) -> Result<DVec3> {
        self.guarded(id, false, |sys| found(native_system::center_of_mass_position(sys, id)?))
    }

    pub fn world_transform(&self, id: BodyId) -> Result<DMat4> {
        self.guarded(id, false, |sys| found(native_system::world_transform(sys, id)?))
    }

    pub fn linear_velocity(&self, id: BodyId) -> Result<Vec3> {
        self.guarded(id, false, |sys| found(native_system::linear_velocity(sys, id)?))
    }

    pub fn angular_velocity(&self, id: BodyId) -> Result<Vec3> {
        self.guarded(id, false, |sys| found(native_system::angular_velocity(sys, id)?))
    }

    pub fn motion_type(&self, id: BodyId) -> Result<EMotionType> {
        self.guarded(id, false, |sys| {
            found(native_system::read_body(sys, id, |record, _| record.motion_type)?)
        })
    }

    pub fn user_data(&self, id: BodyId) -> Result<u64> {
        self.guarded(id, false, |sys| {
            found(native_system::read_body(sys, id, |record, _| record.user_data)?)
        })
    }

    pub fn set_position_and_rotation(
        &self,
        id: BodyId,
        position: DVec3,
        rotation: Quat,
        activation: EActivation,
    ) -> Result<()> {
        check_dvec3("position", position)?;
        check_quat("rotation", rotation)?;
        self.guarded(id, true, |sys| {
            done(native_system::set_position_and_rotation(sys, id, position, rotation, activation)?)
        })
    }

    pub fn set_position(&self, id: BodyId, position: DVec3, activation: EActivation) -> Result<()> {
        let rotation = self.rotation(id)?;
        self.set_position_and_rotation(id, position, rotation, activation)
    }

    pub fn set_rotation(&self, id: BodyId, rotation: Quat, activation: EActivation) -> Result<()> {
        let position = self.position(id)?;
        self.set_position_and_rotation(id, position, rotation, activation)
    }

    pub fn set_linear_velocity(&self, id: BodyId, velocity: Vec3) -> Result<()> {
        check_vec3("linear velocity", velocity)?;
        self.guarded(id, true, |sys| done(native_system::set_linear_velocity(sys, id, velocity)?))
    }

    pub fn set_angular_velocity(&self, id: BodyId, velocity: Vec3) -> Result<()> {
        check_vec3("angular velocity", velocity)?;
        self.guarded(id, true, |sys| done(native_system::set_angular_velocity(sys, id, velocity)?))
    }

    pub fn add_force(&self, id: BodyId, force: Vec3) -> Result<()> {
        check_vec3("force", force)?;
        self.guarded(id, true, |sys| done(native_system::add_force(sys, id, force)?))
    }

    pub fn add_impulse(&self, id: BodyId, impulse: Vec3) -> Result<()> {
        check_vec3("impulse", impulse)?;
        self.guarded(id, true, |sys| done(native_system::add_impulse(sys, id, impulse)?))
    }

    pub fn set_motion_type(&self, id: BodyId, motion_type: EMotionType, activation: EActivation) -> Result<()> {
        self.guarded(id, true, |sys| {
            done(native_system::set_motion_type(sys, id, motion_type, activation)?)
        })
    }

    pub fn set_friction(&self, id: BodyId, friction: f32) -> Result<()> {
        check_finite("friction", &[friction as f64])?;
        self.guarded(id, true, |sys| done(native_system::set_friction(sys, id, friction)?))
    }

    pub fn set_restitution(&self, id: BodyId, restitution: f32) -> Result<()> {
        check_finite("restitution", &[restitution as f64])?;
        self.guarded(id, true, |sys| done(native_system::set_restitution(sys, id, restitution)?))
    }

    pub fn set_gravity_factor(&self, id: BodyId, factor: f32) -> Result<()> {
        check_finite("gravity factor", &[factor as f64])?;
        self.guarded(id, true, |sys| done(native_system::set_gravity_factor(sys, id, factor)?))
    }

    pub fn set_user_data(&self, id: BodyId, user_data: u64) -> Result<()> {
        self.guarded(id, true, |sys| done(native_system::set_user_data(sys, id, user_data)?))
    }
}

// ============================================================================
// 刚体锁
// ============================================================================

native_wrapper!(
    /// 按刚体加锁的接口（位于物理系统内部）
    BodyLockInterface,
    "BodyLockInterface",
    free_object
);

impl BodyLockInterface {
    fn lock(&self, id: BodyId, write: bool) -> Result<(Option<StripeGuard>, Option<Body>)> {
        let (system_va, locking) = native_system::lock_interface_target(self.va()?)?;
        let system = system_of(self)?;
        let guard = if locking {
            Some(native_system::lock_body(system_va, id, write)?)
        } else {
            None
        };
        let body = native_system::body_proxy(system_va, id)?.map(|proxy| Body::view(proxy, &system));
        Ok((guard, body))
    }

    pub fn lock_read(&self, id: BodyId) -> Result<BodyLockRead> {
        let (guard, body) = self.lock(id, false)?;
        Ok(BodyLockRead { body, _guard: guard })
    }

    pub fn lock_write(&self, id: BodyId) -> Result<BodyLockWrite> {
        let (guard, body) = self.lock(id, true)?;
        Ok(BodyLockWrite { body, _guard: guard })
    }
}

/// 读锁守卫；析构时解锁
pub struct BodyLockRead {
    body: Option<Body>,
    _guard: Option<StripeGuard>,
}

impl BodyLockRead {
    /// 刚体存在时为 true
    pub fn succeeded(&self) -> bool {
        self.body.is_some()
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn release(self) {}
}

/// 写锁守卫；析构时解锁
pub struct BodyLockWrite {
    body: Option<Body>,
    _guard: Option<StripeGuard>,
}

impl BodyLockWrite {
    pub fn succeeded(&self) -> bool {
        self.body.is_some()
    }

    /// 刚体的方法本身不加锁，在守卫存活期间可以直接修改
    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn release(self) {}
}

// ============================================================================
// 测试用场景
// ============================================================================

#[cfg(test)]
pub(crate) mod fixture {
    use super::*;
    use crate::physics::shape::{BoxShapeSettings, ShapeSettings, SphereShapeSettings};

    pub const LAYER_NON_MOVING: u32 = 0;
    pub const LAYER_MOVING: u32 = 1;

    /// 两层的场景：静止层只与运动层碰撞
    pub struct TestWorld {
        pub system: PhysicsSystem,
        pub temp_allocator: TempAllocatorImpl,
        pub jobs: JobSystemThreadPool,
    }

    impl TestWorld {
        pub fn new(max_bodies: u32, max_body_pairs: u32) -> Self {
            Self::with_limits(max_bodies, max_body_pairs, 1024, 1 << 20)
        }

        /// 指定接触约束上限与暂存内存大小
        pub fn with_limits(max_bodies: u32, max_body_pairs: u32, max_contact_constraints: u32, temp_bytes: usize) -> Self {
            let bp = BroadPhaseLayerInterfaceTable::new(2, 2).unwrap();
            bp.map_object_to_broad_phase_layer(LAYER_NON_MOVING, 0).unwrap();
            bp.map_object_to_broad_phase_layer(LAYER_MOVING, 1).unwrap();
            let ovo = ObjectLayerPairFilterTable::new(2).unwrap();
            ovo.enable_collision(LAYER_NON_MOVING, LAYER_MOVING).unwrap();
            ovo.enable_collision(LAYER_MOVING, LAYER_MOVING).unwrap();
            let ovb = ObjectVsBroadPhaseLayerFilterTable::new(&bp, 2, &ovo, 2).unwrap();
            let system =
                PhysicsSystem::new(max_bodies, 0, max_body_pairs, max_contact_constraints, &bp, &ovb, &ovo).unwrap();
            Self {
                system,
                temp_allocator: TempAllocatorImpl::new(temp_bytes),
                jobs: JobSystemThreadPool::new(64, 8, 1).unwrap(),
            }
        }

        pub fn step(&self) -> PhysicsUpdateError {
            self.system
                .update(1.0 / 60.0, 1, &self.temp_allocator, &self.jobs)
                .unwrap()
        }

        pub fn floor_settings(&self) -> BodyCreationSettings {
            let shape = BoxShapeSettings::new(Vec3::new(50.0, 1.0, 50.0))
                .unwrap()
                .into_shape()
                .unwrap()
                .unwrap();
            BodyCreationSettings::new(
                &shape,
                DVec3::new(0.0, -1.0, 0.0),
                Quat::IDENTITY,
                EMotionType::Static,
                LAYER_NON_MOVING,
            )
            .unwrap()
        }

        pub fn sphere_settings(&self, position: DVec3, radius: f32) -> BodyCreationSettings {
            let shape = SphereShapeSettings::new(radius).unwrap().into_shape().unwrap().unwrap();
            BodyCreationSettings::new(&shape, position, Quat::IDENTITY, EMotionType::Dynamic, LAYER_MOVING).unwrap()
        }

        pub fn add_floor(&self) -> BodyId {
            self.system
                .body_interface()
                .unwrap()
                .create_and_add_body(&self.floor_settings(), EActivation::DontActivate)
                .unwrap()
                .unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::*;
    use super::*;
    use crate::native::heap;
    use crate::physics::filter::CollisionGroup;
    use crate::physics::listener::{ContactListener, ContactManifold};
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_sphere_settles_on_floor() {
        let world = TestWorld::new(16, 16);
        world.add_floor();
        let bodies = world.system.body_interface().unwrap();
        let ball = bodies
            .create_and_add_body(&world.sphere_settings(DVec3::new(0.0, 10.0, 0.0), 0.5), EActivation::Activate)
            .unwrap()
            .unwrap();
        assert_eq!(bodies.body_state(ball).unwrap(), BodyState::RegisteredActive);

        for _ in 0..600 {
            assert!(world.step().is_ok());
        }
        let y = bodies.position(ball).unwrap().y;
        assert!((y - 0.5).abs() < 0.05, "sphere rests at {}", y);
        assert_eq!(world.system.num_bodies().unwrap(), 2);
    }

    #[test]
    fn test_repeated_transform_queries_are_identical() {
        let world = TestWorld::new(4, 4);
        let floor = world.add_floor();
        let bodies = world.system.body_interface().unwrap();
        let first = bodies.world_transform(floor).unwrap();
        world.step();
        let second = bodies.world_transform(floor).unwrap();
        assert_eq!(first.to_cols_array(), second.to_cols_array());
        assert_eq!(bodies.position(floor).unwrap(), DVec3::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn test_body_ownership_moves_with_registration() {
        let world = TestWorld::new(4, 4);
        let bodies = world.system.body_interface().unwrap();
        let body = bodies
            .create_body(&world.sphere_settings(DVec3::ZERO, 1.0))
            .unwrap()
            .unwrap();
        let proxy = body.va().unwrap();
        assert!(body.owns_native_object());
        assert!(!body.is_in_broad_phase().unwrap());

        bodies.add_body(&body, EActivation::DontActivate).unwrap();
        assert!(!body.owns_native_object());
        assert!(matches!(bodies.destroy_body(&body), Err(BridgeError::OwnershipViolation(_))));
        assert!(matches!(
            bodies.add_body(&body, EActivation::Activate),
            Err(BridgeError::OwnershipViolation(_))
        ));

        bodies.remove_body(&body).unwrap();
        assert!(body.owns_native_object());
        assert_eq!(bodies.body_state(body.id().unwrap()).unwrap(), BodyState::Unregistered);

        let id = body.id().unwrap();
        bodies.destroy_body(&body).unwrap();
        assert!(!heap::is_live(proxy));
        assert!(!body.has_assigned_native_object());
        assert!(bodies.body(id).unwrap().is_none());
        body.close().unwrap();
    }

    #[test]
    fn test_registry_owned_body_survives_wrapper_drop() {
        let world = TestWorld::new(4, 4);
        let bodies = world.system.body_interface().unwrap();
        let body = bodies
            .create_body(&world.sphere_settings(DVec3::new(0.0, 3.0, 0.0), 0.5))
            .unwrap()
            .unwrap();
        let id = body.id().unwrap();
        bodies.add_body(&body, EActivation::Activate).unwrap();
        drop(body);

        assert!(bodies.is_added(id).unwrap());
        let view = bodies.body(id).unwrap().unwrap();
        assert!(!view.owns_native_object());
        assert!(matches!(view.close(), Err(BridgeError::OwnershipViolation(_))));
        assert_eq!(world.system.body_ids().unwrap(), vec![id]);
    }

    #[test]
    fn test_dropping_unregistered_body_destroys_it() {
        let world = TestWorld::new(4, 4);
        let bodies = world.system.body_interface().unwrap();
        let body = bodies
            .create_body(&world.sphere_settings(DVec3::ZERO, 1.0))
            .unwrap()
            .unwrap();
        let proxy = body.va().unwrap();
        assert_eq!(world.system.num_bodies().unwrap(), 1);
        drop(body);
        assert!(!heap::is_live(proxy));
        assert_eq!(world.system.num_bodies().unwrap(), 0);
    }

    #[test]
    fn test_create_body_returns_none_past_capacity() {
        let world = TestWorld::new(1, 4);
        let bodies = world.system.body_interface().unwrap();
        let settings = world.sphere_settings(DVec3::ZERO, 1.0);
        let first = bodies.create_body(&settings).unwrap();
        assert!(first.is_some());
        assert!(bodies.create_body(&settings).unwrap().is_none());
        assert_eq!(world.system.max_bodies().unwrap(), 1);
    }

    #[test]
    fn test_body_pair_capacity_is_reported() {
        let world = TestWorld::new(4, 0);
        world.add_floor();
        let bodies = world.system.body_interface().unwrap();
        bodies
            .create_and_add_body(&world.sphere_settings(DVec3::new(0.0, 0.45, 0.0), 0.5), EActivation::Activate)
            .unwrap();
        let mut mask = PhysicsUpdateError::NONE;
        for _ in 0..5 {
            mask = PhysicsUpdateError(mask.bits() | world.step().bits());
        }
        assert!(mask.contains(PhysicsUpdateError::BODY_PAIR_CACHE_FULL));
        assert!(!mask.contains(PhysicsUpdateError::CONTACT_CONSTRAINTS_FULL));
    }

    fn step_resting_sphere(world: &TestWorld) -> PhysicsUpdateError {
        world.add_floor();
        world
            .system
            .body_interface()
            .unwrap()
            .create_and_add_body(&world.sphere_settings(DVec3::new(0.0, 0.45, 0.0), 0.5), EActivation::Activate)
            .unwrap();
        let mut mask = PhysicsUpdateError::NONE;
        for _ in 0..5 {
            mask = PhysicsUpdateError(mask.bits() | world.step().bits());
        }
        mask
    }

    #[test]
    fn test_tiny_temp_allocator_reports_manifold_cache_full() {
        let world = TestWorld::with_limits(4, 16, 1024, 1);
        assert_eq!(world.temp_allocator.capacity().unwrap(), 1);
        let mask = step_resting_sphere(&world);
        assert!(mask.contains(PhysicsUpdateError::MANIFOLD_CACHE_FULL));
        assert!(!mask.contains(PhysicsUpdateError::BODY_PAIR_CACHE_FULL));
    }

    #[test]
    fn test_contact_constraint_capacity_is_reported() {
        let world = TestWorld::with_limits(4, 16, 0, 1 << 20);
        let mask = step_resting_sphere(&world);
        assert!(mask.contains(PhysicsUpdateError::CONTACT_CONSTRAINTS_FULL));
        assert!(!mask.contains(PhysicsUpdateError::MANIFOLD_CACHE_FULL));
    }

    #[test]
    fn test_group_filter_stays_alive_while_body_is_registered() {
        let world = TestWorld::new(4, 4);
        let bodies = world.system.body_interface().unwrap();
        let settings = world.sphere_settings(DVec3::ZERO, 1.0);
        let table = GroupFilterTable::new(2).unwrap();
        let table_va = table.va().unwrap();
        settings.set_collision_group(&CollisionGroup::new(&table, 3, 1)).unwrap();

        let id = bodies.create_and_add_body(&settings, EActivation::Activate).unwrap().unwrap();
        drop(table);
        drop(settings);
        assert!(heap::is_live(table_va));

        let view = bodies.body(id).unwrap().unwrap();
        let group = view.collision_group().unwrap();
        assert_eq!(group.group_id, 3);
        assert_eq!(group.sub_group_id, 1);
        drop(view);
        assert!(heap::is_live(table_va));

        drop(bodies);
        world.system.close().unwrap();
        assert!(!heap::is_live(table_va));
    }

    #[test]
    fn test_group_filter_suppresses_collisions() {
        let world = TestWorld::new(8, 8);
        let bodies = world.system.body_interface().unwrap();
        world.system.set_gravity(Vec3::ZERO).unwrap();
        let table = GroupFilterTable::new(2).unwrap();
        table.disable_collision(0, 1).unwrap();

        let left = world.sphere_settings(DVec3::new(-2.0, 0.0, 0.0), 0.5);
        left.set_collision_group(&CollisionGroup::new(&table, 0, 0)).unwrap();
        left.set_linear_velocity(Vec3::new(2.0, 0.0, 0.0)).unwrap();
        let right = world.sphere_settings(DVec3::new(2.0, 0.0, 0.0), 0.5);
        right.set_collision_group(&CollisionGroup::new(&table, 0, 1)).unwrap();
        right.set_linear_velocity(Vec3::new(-2.0, 0.0, 0.0)).unwrap();

        let a = bodies.create_and_add_body(&left, EActivation::Activate).unwrap().unwrap();
        let b = bodies.create_and_add_body(&right, EActivation::Activate).unwrap().unwrap();
        for _ in 0..120 {
            world.step();
        }
        // 穿过彼此继续运动
        assert!(bodies.position(a).unwrap().x > 1.0);
        assert!(bodies.position(b).unwrap().x < -1.0);
    }

    #[test]
    fn test_locked_body_blocks_only_locking_interface() {
        let world = TestWorld::new(4, 4);
        let floor = world.add_floor();
        let lock = world.system.body_lock_interface().unwrap().lock_write(floor).unwrap();
        assert!(lock.succeeded());
        lock.body().unwrap().set_user_data(42).unwrap();

        let no_lock = world.system.body_interface_no_lock().unwrap();
        assert_eq!(no_lock.user_data(floor).unwrap(), 42);

        let locking = world.system.body_interface().unwrap();
        let (sender, receiver) = mpsc::channel();
        let reader = thread::spawn(move || {
            let _ = sender.send(locking.user_data(floor).unwrap());
        });
        assert!(receiver.recv_timeout(Duration::from_millis(200)).is_err());

        lock.release();
        assert_eq!(receiver.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        reader.join().unwrap();
    }

    #[test]
    fn test_lock_on_missing_body_does_not_succeed() {
        let world = TestWorld::new(4, 4);
        let lock = world.system.body_lock_interface_no_lock().unwrap().lock_read(BodyId::new(3, 1)).unwrap();
        assert!(!lock.succeeded());
        assert!(lock.body().is_none());
    }

    #[derive(Default)]
    struct RecordingListener {
        added: Mutex<Vec<(BodyId, BodyId)>>,
        removed: Mutex<Vec<(BodyId, BodyId)>>,
    }

    impl ContactListener for RecordingListener {
        fn on_contact_added(&self, body1: BodyId, body2: BodyId, _manifold: &ContactManifold) {
            self.added.lock().unwrap().push((body1, body2));
        }

        fn on_contact_removed(&self, body1: BodyId, body2: BodyId) {
            self.removed.lock().unwrap().push((body1, body2));
        }
    }

    #[test]
    fn test_contact_listener_receives_events() {
        let world = TestWorld::new(4, 4);
        let floor = world.add_floor();
        let recording = Arc::new(RecordingListener::default());
        let listener = CustomContactListener::new(recording.clone());
        let listener_va = listener.va().unwrap();
        world.system.set_contact_listener(&listener).unwrap();
        drop(listener);
        assert!(heap::is_live(listener_va));

        let bodies = world.system.body_interface().unwrap();
        let ball = bodies
            .create_and_add_body(&world.sphere_settings(DVec3::new(0.0, 1.0, 0.0), 0.5), EActivation::Activate)
            .unwrap()
            .unwrap();
        for _ in 0..120 {
            world.step();
        }
        assert!(!recording.added.lock().unwrap().is_empty());
        let pair = recording.added.lock().unwrap()[0];
        assert!(pair == (floor, ball) || pair == (ball, floor));

        bodies
            .set_position_and_rotation(ball, DVec3::new(0.0, 20.0, 0.0), Quat::IDENTITY, EActivation::Activate)
            .unwrap();
        world.step();
        assert!(!recording.removed.lock().unwrap().is_empty());

        world.system.clear_contact_listener().unwrap();
        assert!(!heap::is_live(listener_va));
    }

    #[test]
    fn test_non_finite_inputs_are_rejected() {
        let world = TestWorld::new(4, 4);
        let floor = world.add_floor();
        let bodies = world.system.body_interface().unwrap();
        assert!(matches!(
            bodies.set_linear_velocity(floor, Vec3::new(f32::NAN, 0.0, 0.0)),
            Err(BridgeError::NonFinite { .. })
        ));
        assert!(matches!(
            world.system.set_gravity(Vec3::new(0.0, f32::INFINITY, 0.0)),
            Err(BridgeError::NonFinite { .. })
        ));
        assert!(matches!(
            world.system.update(f32::NAN, 1, &world.temp_allocator, &world.jobs),
            Err(BridgeError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_interfaces_are_views_into_system() {
        let world = TestWorld::new(4, 4);
        let bodies = world.system.body_interface().unwrap();
        assert!(bodies.is_locking().unwrap());
        assert!(!world.system.body_interface_no_lock().unwrap().is_locking().unwrap());
        assert!(matches!(bodies.close(), Err(BridgeError::OwnershipViolation(_))));
        assert!(bodies.system().unwrap().same_native_object(&world.system));
        world.system.close().unwrap();
        assert!(matches!(
            bodies.body_state(BodyId::new(0, 1)),
            Err(BridgeError::InvalidHandle { .. })
        ));
    }
}
