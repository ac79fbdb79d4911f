//! 刚体与刚体创建设置

use glam::{DVec3, Quat, Vec3};

use crate::lifetime::retention::{self, Relation};
use crate::lifetime::wrapper::{free_object, native_wrapper};
use crate::lifetime::NativeWrapper;
use crate::native::body::{self as native_body, BodySettingsData};
use crate::native::system as native_system;
use crate::readonly::{ConstBody, ConstBodyCreationSettings, ConstShape, ConstShapeSettings, EMotionType, NativeView};
use crate::{check_dvec3, check_finite, check_quat, check_vec3, BridgeError, Result};

use super::filter::{CollisionGroup, GroupFilterTable};
use super::system::PhysicsSystem;

pub use crate::native::body::BodyId;

native_wrapper!(
    /// 刚体创建参数
    ///
    /// 形状或形状设置各持有一次计数；碰撞组的过滤表只存地址，由本包装保活。
    BodyCreationSettings,
    "BodyCreationSettings",
    free_object
);

impl ConstBodyCreationSettings for BodyCreationSettings {}

impl BodyCreationSettings {
    pub fn new(
        shape: &impl ConstShape,
        position: DVec3,
        rotation: Quat,
        motion_type: EMotionType,
        object_layer: u32,
    ) -> Result<Self> {
        check_dvec3("position", position)?;
        check_quat("rotation", rotation)?;
        let data = BodySettingsData {
            position,
            rotation,
            motion_type,
            object_layer,
            shape: shape.view_va()?,
            ..BodySettingsData::default()
        };
        Ok(Self::adopt(native_body::create_settings(data)?))
    }

    /// 由形状设置创建；创建刚体时才构建形状
    pub fn from_shape_settings(
        shape_settings: &impl ConstShapeSettings,
        position: DVec3,
        rotation: Quat,
        motion_type: EMotionType,
        object_layer: u32,
    ) -> Result<Self> {
        check_dvec3("position", position)?;
        check_quat("rotation", rotation)?;
        let data = BodySettingsData {
            position,
            rotation,
            motion_type,
            object_layer,
            shape_settings: shape_settings.view_va()?,
            ..BodySettingsData::default()
        };
        Ok(Self::adopt(native_body::create_settings(data)?))
    }

    fn edit(&self, f: impl FnOnce(&mut BodySettingsData)) -> Result<()> {
        native_body::edit_settings(self.va()?, f)?;
        Ok(())
    }

    pub fn set_position(&self, position: DVec3) -> Result<()> {
        check_dvec3("position", position)?;
        self.edit(|d| d.position = position)
    }

    pub fn set_rotation(&self, rotation: Quat) -> Result<()> {
        check_quat("rotation", rotation)?;
        self.edit(|d| d.rotation = rotation)
    }

    pub fn set_linear_velocity(&self, velocity: Vec3) -> Result<()> {
        check_vec3("linear velocity", velocity)?;
        self.edit(|d| d.linear_velocity = velocity)
    }

    pub fn set_angular_velocity(&self, velocity: Vec3) -> Result<()> {
        check_vec3("angular velocity", velocity)?;
        self.edit(|d| d.angular_velocity = velocity)
    }

    pub fn set_motion_type(&self, motion_type: EMotionType) -> Result<()> {
        self.edit(|d| d.motion_type = motion_type)
    }

    pub fn set_object_layer(&self, object_layer: u32) -> Result<()> {
        self.edit(|d| d.object_layer = object_layer)
    }

    pub fn set_friction(&self, friction: f32) -> Result<()> {
        check_finite("friction", &[friction as f64])?;
        self.edit(|d| d.friction = friction)
    }

    pub fn set_restitution(&self, restitution: f32) -> Result<()> {
        check_finite("restitution", &[restitution as f64])?;
        self.edit(|d| d.restitution = restitution)
    }

    pub fn set_linear_damping(&self, damping: f32) -> Result<()> {
        check_finite("linear damping", &[damping as f64])?;
        self.edit(|d| d.linear_damping = damping)
    }

    pub fn set_angular_damping(&self, damping: f32) -> Result<()> {
        check_finite("angular damping", &[damping as f64])?;
        self.edit(|d| d.angular_damping = damping)
    }

    pub fn set_gravity_factor(&self, factor: f32) -> Result<()> {
        check_finite("gravity factor", &[factor as f64])?;
        self.edit(|d| d.gravity_factor = factor)
    }

    pub fn set_allow_sleeping(&self, allow: bool) -> Result<()> {
        self.edit(|d| d.allow_sleeping = allow)
    }

    pub fn set_is_sensor(&self, is_sensor: bool) -> Result<()> {
        self.edit(|d| d.is_sensor = is_sensor)
    }

    pub fn set_user_data(&self, user_data: u64) -> Result<()> {
        self.edit(|d| d.user_data = user_data)
    }

    pub fn set_shape(&self, shape: &impl ConstShape) -> Result<()> {
        Ok(native_body::set_settings_shape(self.va()?, shape.view_va()?)?)
    }

    pub fn set_shape_settings(&self, shape_settings: &impl ConstShapeSettings) -> Result<()> {
        native_body::set_settings_shape(self.va()?, 0)?;
        Ok(native_body::set_settings_shape_settings(self.va()?, shape_settings.view_va()?)?)
    }

    pub fn set_collision_group(&self, group: &CollisionGroup) -> Result<()> {
        let data = group.to_data()?;
        self.edit(|d| d.collision_group = data)?;
        hold_group_filter(self, group);
        Ok(())
    }

    pub fn collision_group(&self) -> Result<CollisionGroup> {
        let data = native_body::settings_data(self.va()?)?.collision_group;
        Ok(CollisionGroup::from_data(data, retention::retained(self, Relation::GROUP_FILTER)))
    }
}

pub(crate) fn hold_group_filter<O: NativeWrapper>(owner: &O, group: &CollisionGroup) {
    match &group.filter {
        Some(filter) => retention::retain(owner, Relation::GROUP_FILTER, filter),
        None => retention::release_hold(owner, Relation::GROUP_FILTER),
    }
}

// ============================================================================
// 刚体
// ============================================================================

/// 刚体包装的释放动作：销毁未加入系统的刚体
pub(crate) fn destroy_body(proxy_va: u64) {
    if let Err(fault) = native_system::destroy_body_by_proxy(proxy_va) {
        log::error!("[刚体] 销毁 {:#x} 失败: {}", proxy_va, fault);
    }
}

native_wrapper!(
    /// 刚体
    ///
    /// 由 `BodyInterface::create_body` 得到的包装拥有刚体，加入系统后所有权转给系统，
    /// 移出系统后再转回来。刚体的方法不加锁，与 `BodyLockInterface` 锁住后的访问对应。
    Body,
    "Body",
    destroy_body
);

impl ConstBody for Body {}

fn require_body(done: bool) -> Result<()> {
    if done {
        Ok(())
    } else {
        Err(BridgeError::InvalidHandle { kind: "Body" })
    }
}

impl Body {
    /// 拥有新创建的刚体；保活所在系统与碰撞组过滤表
    ///
    /// 系统里的刚体记录也引用过滤表地址，所以过滤表同时固定在系统上。
    pub(crate) fn owned(proxy_va: u64, system: &PhysicsSystem, filter: Option<GroupFilterTable>) -> Self {
        let body = Self::adopt(proxy_va);
        retention::retain(&body, Relation::SYSTEM, system);
        if let Some(filter) = filter {
            retention::pin(system, &filter);
            retention::retain(&body, Relation::GROUP_FILTER, &filter);
        }
        body
    }

    /// 不拥有的视图；刚体由系统注册表负责
    pub(crate) fn view(proxy_va: u64, system: &PhysicsSystem) -> Self {
        let body = Self::borrowed(proxy_va);
        retention::retain(&body, Relation::SYSTEM, system);
        body
    }

    pub fn system(&self) -> Option<PhysicsSystem> {
        retention::retained(self, Relation::SYSTEM)
    }

    pub fn set_linear_velocity(&self, velocity: Vec3) -> Result<()> {
        check_vec3("linear velocity", velocity)?;
        let (sys, id) = self.location()?;
        require_body(native_system::set_linear_velocity(sys, id, velocity)?)
    }

    pub fn set_angular_velocity(&self, velocity: Vec3) -> Result<()> {
        check_vec3("angular velocity", velocity)?;
        let (sys, id) = self.location()?;
        require_body(native_system::set_angular_velocity(sys, id, velocity)?)
    }

    pub fn add_force(&self, force: Vec3) -> Result<()> {
        check_vec3("force", force)?;
        let (sys, id) = self.location()?;
        require_body(native_system::add_force(sys, id, force)?)
    }

    pub fn add_impulse(&self, impulse: Vec3) -> Result<()> {
        check_vec3("impulse", impulse)?;
        let (sys, id) = self.location()?;
        require_body(native_system::add_impulse(sys, id, impulse)?)
    }

    pub fn set_friction(&self, friction: f32) -> Result<()> {
        check_finite("friction", &[friction as f64])?;
        let (sys, id) = self.location()?;
        require_body(native_system::set_friction(sys, id, friction)?)
    }

    pub fn set_restitution(&self, restitution: f32) -> Result<()> {
        check_finite("restitution", &[restitution as f64])?;
        let (sys, id) = self.location()?;
        require_body(native_system::set_restitution(sys, id, restitution)?)
    }

    pub fn set_gravity_factor(&self, factor: f32) -> Result<()> {
        check_finite("gravity factor", &[factor as f64])?;
        let (sys, id) = self.location()?;
        require_body(native_system::set_gravity_factor(sys, id, factor)?)
    }

    pub fn set_user_data(&self, user_data: u64) -> Result<()> {
        let (sys, id) = self.location()?;
        require_body(native_system::set_user_data(sys, id, user_data)?)
    }

    /// 原生侧只记录过滤表地址，本包装负责保活
    pub fn set_collision_group(&self, group: &CollisionGroup) -> Result<()> {
        let (sys, id) = self.location()?;
        require_body(native_system::set_collision_group(sys, id, group.to_data()?)?)?;
        if let (Some(system), Some(filter)) = (self.system(), &group.filter) {
            retention::pin(&system, filter);
        }
        hold_group_filter(self, group);
        Ok(())
    }

    pub fn collision_group(&self) -> Result<CollisionGroup> {
        let (sys, id) = self.location()?;
        let data = native_system::read_body(sys, id, |record, _| record.collision_group)?
            .ok_or(BridgeError::InvalidHandle { kind: "Body" })?;
        Ok(CollisionGroup::from_data(data, retention::retained(self, Relation::GROUP_FILTER)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::shape::{BoxShapeSettings, ShapeSettings, SphereShapeSettings};
    use crate::native::heap;

    #[test]
    fn test_creation_settings_accessors() {
        let shape = SphereShapeSettings::new(0.5).unwrap().into_shape().unwrap().unwrap();
        let settings = BodyCreationSettings::new(
            &shape,
            DVec3::new(1.0, 2.0, 3.0),
            Quat::IDENTITY,
            EMotionType::Dynamic,
            1,
        )
        .unwrap();
        assert_eq!(settings.position().unwrap(), DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(settings.object_layer().unwrap(), 1);
        assert_eq!(settings.friction().unwrap(), 0.2);
        assert!(settings.has_shape().unwrap());

        settings.set_friction(0.7).unwrap();
        settings.set_motion_type(EMotionType::Kinematic).unwrap();
        assert_eq!(settings.friction().unwrap(), 0.7);
        assert_eq!(settings.motion_type().unwrap(), EMotionType::Kinematic);
        assert!(matches!(
            settings.set_position(DVec3::new(f64::NAN, 0.0, 0.0)),
            Err(BridgeError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_settings_hold_shape_count() {
        let box_settings = BoxShapeSettings::new(Vec3::ONE).unwrap();
        let settings = BodyCreationSettings::from_shape_settings(
            &box_settings,
            DVec3::ZERO,
            Quat::IDENTITY,
            EMotionType::Static,
            0,
        )
        .unwrap();
        let va = box_settings.va().unwrap();
        assert_eq!(heap::ref_count(va).unwrap(), 2);
        drop(box_settings);
        assert!(heap::is_live(va));
        settings.close().unwrap();
        assert!(!heap::is_live(va));
    }

    #[test]
    fn test_settings_keep_group_filter_alive() {
        let shape = SphereShapeSettings::new(0.5).unwrap().into_shape().unwrap().unwrap();
        let settings =
            BodyCreationSettings::new(&shape, DVec3::ZERO, Quat::IDENTITY, EMotionType::Dynamic, 0).unwrap();
        let table = GroupFilterTable::new(2).unwrap();
        let table_va = table.va().unwrap();
        settings.set_collision_group(&CollisionGroup::new(&table, 1, 0)).unwrap();
        drop(table);
        assert!(heap::is_live(table_va));

        let group = settings.collision_group().unwrap();
        assert_eq!(group.group_id, 1);
        assert_eq!(group.filter.as_ref().unwrap().va().unwrap(), table_va);
        drop(group);

        settings.set_collision_group(&CollisionGroup::none()).unwrap();
        assert!(!heap::is_live(table_va));
    }
}
