//! 骨架与布娃娃
//!
//! `RagdollSettings` 内嵌部件，`Part` 只是设置内部的视图，设置释放后视图失效。
//! `Ragdoll` 记录所在系统的地址，由包装保活系统。

use glam::{DVec3, Quat};

use crate::lifetime::counted::{fresh_target, release_target};
use crate::lifetime::retention::{self, Relation};
use crate::lifetime::wrapper::{free_object, native_wrapper};
use crate::lifetime::{NativeWrapper, Ref, RefTarget};
use crate::native::body::BodySettingsData;
use crate::native::ragdoll as native_ragdoll;
use crate::readonly::{
    ConstConstraintSettings, ConstRagdollSettings, ConstShape, ConstShapeSettings, ConstSkeleton, EActivation,
    EMotionType,
};
use crate::{check_dvec3, check_index, check_quat, BridgeError, Result};

use super::body::BodyId;
use super::constraint::Constraint;
use super::filter::{CollisionGroup, GroupFilterTable};
use super::system::PhysicsSystem;

native_wrapper!(
    /// 关节层级（可计数）
    Skeleton,
    "Skeleton",
    release_target
);

impl RefTarget for Skeleton {}
impl ConstSkeleton for Skeleton {}

pub type SkeletonRef = Ref<Skeleton>;

impl Skeleton {
    pub fn new() -> Result<Self> {
        fresh_target(native_ragdoll::create_skeleton())
    }

    pub(crate) fn share(va: u64) -> Result<Self> {
        fresh_target(va)
    }

    /// 父关节必须已经存在；根关节传 -1
    pub fn add_joint(&self, name: &str, parent_index: i32) -> Result<u32> {
        let va = self.va()?;
        if parent_index >= 0 {
            check_index("parent joint", parent_index as u64, native_ragdoll::num_joints(va)? as u64)?;
        } else if parent_index != -1 {
            return Err(BridgeError::InvalidArgument(format!(
                "parent joint index {} (use -1 for a root)",
                parent_index
            )));
        }
        Ok(native_ragdoll::add_joint(va, name, parent_index)?)
    }

    /// 按父关节名添加；之后需要 [`Skeleton::calculate_parent_joint_indices`]
    pub fn add_joint_named(&self, name: &str, parent_name: &str) -> Result<u32> {
        Ok(native_ragdoll::add_joint_named(self.va()?, name, parent_name)?)
    }

    pub fn calculate_parent_joint_indices(&self) -> Result<()> {
        Ok(native_ragdoll::calculate_parent_joint_indices(self.va()?)?)
    }
}

// ============================================================================
// 布娃娃设置
// ============================================================================

native_wrapper!(
    /// 布娃娃设置（可计数）：骨架 + 每个关节一个部件
    RagdollSettings,
    "RagdollSettings",
    release_target
);

impl RefTarget for RagdollSettings {}
impl ConstRagdollSettings for RagdollSettings {}

pub type RagdollSettingsRef = Ref<RagdollSettings>;

impl RagdollSettings {
    pub fn new() -> Result<Self> {
        fresh_target(native_ragdoll::create_settings())
    }

    pub(crate) fn share(va: u64) -> Result<Self> {
        fresh_target(va)
    }

    pub fn set_skeleton(&self, skeleton: &impl ConstSkeleton) -> Result<()> {
        Ok(native_ragdoll::set_skeleton(self.va()?, skeleton.view_va()?)?)
    }

    pub fn skeleton(&self) -> Result<Option<Skeleton>> {
        match native_ragdoll::skeleton(self.va()?)? {
            0 => Ok(None),
            va => Skeleton::share(va).map(Some),
        }
    }

    /// 调整部件数量；被截掉的部件随之释放，它们的视图不再可用
    pub fn resize_parts(&self, count: u32) -> Result<()> {
        Ok(native_ragdoll::resize_parts(self.va()?, count)?)
    }

    pub fn part(&self, index: u32) -> Result<Part> {
        let va = self.va()?;
        check_index("part", index as u64, native_ragdoll::num_parts(va)? as u64)?;
        let part_va = native_ragdoll::part(va, index)?.ok_or(BridgeError::InvalidHandle { kind: "RagdollPart" })?;
        Ok(Part::contained(part_va, self))
    }

    /// 检查骨架、部件数量与父约束是否齐全
    pub fn stabilize(&self) -> Result<bool> {
        Ok(native_ragdoll::stabilize(self.va()?)?)
    }

    pub fn disable_parent_child_collisions(&self) -> Result<()> {
        Ok(native_ragdoll::disable_parent_child_collisions(self.va()?)?)
    }

    /// `disable_parent_child_collisions` 建立的过滤表
    pub fn group_filter(&self) -> Result<Option<GroupFilterTable>> {
        match native_ragdoll::group_filter(self.va()?)? {
            0 => Ok(None),
            va => GroupFilterTable::share(va).map(Some),
        }
    }

    /// 在系统中创建所有部件的刚体与约束（尚未加入模拟）；任一刚体创建失败时返回 `None`
    pub fn create_ragdoll(&self, collision_group_id: u32, user_data: u64, system: &PhysicsSystem) -> Result<Option<Ragdoll>> {
        let va = native_ragdoll::create_ragdoll(self.va()?, collision_group_id, user_data, system.va()?)?;
        if va == 0 {
            return Ok(None);
        }
        let ragdoll: Ragdoll = fresh_target(va)?;
        retention::retain(&ragdoll, Relation::SYSTEM, system);
        log::debug!("[布娃娃] 创建 {}，组 {}", ragdoll.handle(), collision_group_id);
        Ok(Some(ragdoll))
    }
}

native_wrapper!(
    /// 布娃娃部件（位于设置内部）
    Part,
    "RagdollPart",
    free_object
);

impl Part {
    fn settings(&self) -> Result<RagdollSettings> {
        self.core()
            .container()
            .map(|core| RagdollSettings::from_core(std::sync::Arc::clone(core)))
            .ok_or(BridgeError::InvalidHandle { kind: Self::TYPE_NAME })
    }

    fn data(&self) -> Result<BodySettingsData> {
        Ok(native_ragdoll::part_data(self.va()?)?.0)
    }

    fn edit(&self, f: impl FnOnce(&mut BodySettingsData)) -> Result<()> {
        native_ragdoll::edit_part(self.va()?, f)?;
        Ok(())
    }

    pub fn set_shape(&self, shape: &impl ConstShape) -> Result<()> {
        Ok(native_ragdoll::set_part_shape(self.va()?, shape.view_va()?)?)
    }

    pub fn set_shape_settings(&self, shape_settings: &impl ConstShapeSettings) -> Result<()> {
        Ok(native_ragdoll::set_part_shape_settings(self.va()?, shape_settings.view_va()?)?)
    }

    /// 连接父部件的约束设置
    pub fn set_to_parent(&self, settings: &impl ConstConstraintSettings) -> Result<()> {
        Ok(native_ragdoll::set_part_to_parent(self.va()?, settings.view_va()?)?)
    }

    pub fn has_to_parent(&self) -> Result<bool> {
        Ok(native_ragdoll::part_data(self.va()?)?.1 != 0)
    }

    pub fn set_position(&self, position: DVec3) -> Result<()> {
        check_dvec3("position", position)?;
        self.edit(|d| d.position = position)
    }

    pub fn set_rotation(&self, rotation: Quat) -> Result<()> {
        check_quat("rotation", rotation)?;
        self.edit(|d| d.rotation = rotation)
    }

    pub fn set_motion_type(&self, motion_type: EMotionType) -> Result<()> {
        self.edit(|d| d.motion_type = motion_type)
    }

    pub fn set_object_layer(&self, object_layer: u32) -> Result<()> {
        self.edit(|d| d.object_layer = object_layer)
    }

    /// 部件只记录过滤表地址，过滤表固定在所在的设置上
    pub fn set_collision_group(&self, group: &CollisionGroup) -> Result<()> {
        let data = group.to_data()?;
        self.edit(|d| d.collision_group = data)?;
        if let Some(filter) = &group.filter {
            retention::pin(&self.settings()?, filter);
        }
        Ok(())
    }

    pub fn position(&self) -> Result<DVec3> {
        Ok(self.data()?.position)
    }

    pub fn rotation(&self) -> Result<Quat> {
        Ok(self.data()?.rotation)
    }

    pub fn motion_type(&self) -> Result<EMotionType> {
        Ok(self.data()?.motion_type)
    }

    pub fn object_layer(&self) -> Result<u32> {
        Ok(self.data()?.object_layer)
    }

    pub fn collision_group(&self) -> Result<CollisionGroup> {
        let data = self.data()?.collision_group;
        let filter = match data.filter {
            0 => None,
            va => Some(GroupFilterTable::share(va)?),
        };
        Ok(CollisionGroup::from_data(data, filter))
    }
}

// ============================================================================
// 布娃娃
// ============================================================================

native_wrapper!(
    /// 布娃娃（可计数）；释放时把刚体与约束移出系统并销毁刚体
    Ragdoll,
    "Ragdoll",
    release_target
);

impl RefTarget for Ragdoll {}

pub type RagdollRef = Ref<Ragdoll>;

impl Ragdoll {
    pub fn add_to_physics_system(&self, activation: EActivation) -> Result<()> {
        Ok(native_ragdoll::add_to_physics_system(self.va()?, activation)?)
    }

    pub fn remove_from_physics_system(&self) -> Result<()> {
        Ok(native_ragdoll::remove_from_physics_system(self.va()?)?)
    }

    pub fn body_ids(&self) -> Result<Vec<BodyId>> {
        Ok(native_ragdoll::body_ids(self.va()?)?)
    }

    pub fn num_bodies(&self) -> Result<usize> {
        Ok(self.body_ids()?.len())
    }

    pub fn constraints(&self) -> Result<Vec<Constraint>> {
        native_ragdoll::constraints(self.va()?)?
            .into_iter()
            .map(Constraint::share)
            .collect()
    }

    pub fn num_constraints(&self) -> Result<usize> {
        Ok(native_ragdoll::constraints(self.va()?)?.len())
    }

    /// 任一部件处于活动状态
    pub fn is_active(&self) -> Result<bool> {
        Ok(native_ragdoll::is_active(self.va()?)?)
    }

    pub fn group_id(&self) -> Result<u32> {
        Ok(native_ragdoll::group_id(self.va()?)?)
    }

    pub fn settings(&self) -> Result<RagdollSettings> {
        RagdollSettings::share(native_ragdoll::ragdoll_settings(self.va()?)?)
    }

    pub fn system(&self) -> Option<PhysicsSystem> {
        retention::retained(self, Relation::SYSTEM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::heap;
    use crate::physics::constraint::PointConstraintSettings;
    use crate::physics::shape::{ShapeSettings, SphereShapeSettings};
    use crate::physics::system::fixture::*;

    #[test]
    fn test_skeleton_joints() {
        let skeleton = Skeleton::new().unwrap();
        let root = skeleton.add_joint("pelvis", -1).unwrap();
        skeleton.add_joint("spine", root as i32).unwrap();
        assert!(matches!(skeleton.add_joint("arm", 5), Err(BridgeError::OutOfRange { .. })));
        assert!(matches!(skeleton.add_joint("arm", -2), Err(BridgeError::InvalidArgument(_))));
        skeleton.add_joint_named("head", "spine").unwrap();
        skeleton.calculate_parent_joint_indices().unwrap();

        assert_eq!(skeleton.num_joints().unwrap(), 3);
        assert_eq!(skeleton.joint(2).unwrap().parent_index, 1);
        assert!(skeleton.joint(3).is_err());
        assert!(skeleton.are_joints_correctly_ordered().unwrap());

        let shared: SkeletonRef = skeleton.to_ref().unwrap();
        assert_eq!(shared.joint_index("spine").unwrap(), 1);
    }

    #[test]
    fn test_part_view_dies_with_settings() {
        let settings = RagdollSettings::new().unwrap();
        settings.resize_parts(1).unwrap();
        let part = settings.part(0).unwrap();
        part.set_position(DVec3::new(0.0, 2.0, 0.0)).unwrap();
        assert_eq!(part.position().unwrap(), DVec3::new(0.0, 2.0, 0.0));
        assert!(matches!(settings.part(1), Err(BridgeError::OutOfRange { .. })));

        settings.close().unwrap();
        assert!(matches!(part.position(), Err(BridgeError::InvalidHandle { .. })));
    }

    fn two_part_settings() -> RagdollSettings {
        let skeleton = Skeleton::new().unwrap();
        skeleton.add_joint("upper", -1).unwrap();
        skeleton.add_joint("lower", 0).unwrap();

        let settings = RagdollSettings::new().unwrap();
        settings.set_skeleton(&skeleton).unwrap();
        settings.resize_parts(2).unwrap();
        assert!(!settings.stabilize().unwrap());

        let shape = SphereShapeSettings::new(0.4).unwrap().into_shape().unwrap().unwrap();
        for (index, y) in [(0, 5.0), (1, 4.0)] {
            let part = settings.part(index).unwrap();
            part.set_shape(&shape).unwrap();
            part.set_position(DVec3::new(0.0, y, 0.0)).unwrap();
            part.set_motion_type(EMotionType::Dynamic).unwrap();
            part.set_object_layer(LAYER_MOVING).unwrap();
        }
        let joint = PointConstraintSettings::new(DVec3::new(0.0, 4.5, 0.0), DVec3::new(0.0, 4.5, 0.0)).unwrap();
        settings.part(1).unwrap().set_to_parent(&joint).unwrap();
        assert!(settings.part(1).unwrap().has_to_parent().unwrap());
        assert!(settings.stabilize().unwrap());
        settings.disable_parent_child_collisions().unwrap();
        settings
    }

    #[test]
    fn test_ragdoll_lifecycle() {
        let world = TestWorld::new(8, 16);
        world.add_floor();
        let settings = two_part_settings();
        assert_eq!(settings.constraint_index_to_body_pair().unwrap(), vec![(0, 1)]);
        assert!(settings.skeleton().unwrap().is_some());

        let table = settings.group_filter().unwrap().unwrap();
        assert!(!table.is_collision_enabled(0, 1).unwrap());
        assert_eq!(settings.part(1).unwrap().collision_group().unwrap().sub_group_id, 1);

        let ragdoll = settings.create_ragdoll(7, 99, &world.system).unwrap().unwrap();
        drop(settings);
        assert_eq!(ragdoll.num_bodies().unwrap(), 2);
        assert_eq!(ragdoll.num_constraints().unwrap(), 1);
        assert_eq!(ragdoll.group_id().unwrap(), 7);
        assert!(ragdoll.system().unwrap().same_native_object(&world.system));
        assert_eq!(ragdoll.settings().unwrap().num_parts().unwrap(), 2);

        ragdoll.add_to_physics_system(EActivation::Activate).unwrap();
        assert!(ragdoll.is_active().unwrap());
        assert_eq!(world.system.body_ids().unwrap().len(), 3);
        assert_eq!(world.system.num_constraints().unwrap(), 1);

        let bodies = world.system.body_interface().unwrap();
        let ids = ragdoll.body_ids().unwrap();
        assert_eq!(bodies.user_data(ids[0]).unwrap(), 99);
        for _ in 0..60 {
            world.step();
        }
        let gap = (bodies.position(ids[0]).unwrap() - bodies.position(ids[1]).unwrap()).length();
        assert!((gap - 1.0).abs() < 0.1, "parts drifted to {}", gap);

        ragdoll.remove_from_physics_system().unwrap();
        assert!(!ragdoll.is_active().unwrap());
        assert_eq!(world.system.num_constraints().unwrap(), 0);
        assert_eq!(world.system.num_bodies().unwrap(), 3);

        let constraint_va = ragdoll.constraints().unwrap()[0].va().unwrap();
        drop(ragdoll);
        assert_eq!(world.system.num_bodies().unwrap(), 1);
        assert!(!heap::is_live(constraint_va));
    }

    #[test]
    fn test_create_ragdoll_ignores_parent_outside_parts() {
        let world = TestWorld::new(8, 16);
        let skeleton = Skeleton::new().unwrap();
        skeleton.add_joint_named("root", "").unwrap();
        skeleton.add_joint_named("a", "e").unwrap();
        for name in ["b", "c", "d", "e"] {
            skeleton.add_joint_named(name, "").unwrap();
        }
        skeleton.calculate_parent_joint_indices().unwrap();
        assert_eq!(skeleton.joint(1).unwrap().parent_index, 5);

        let settings = RagdollSettings::new().unwrap();
        settings.set_skeleton(&skeleton).unwrap();
        settings.resize_parts(2).unwrap();
        let shape = SphereShapeSettings::new(0.4).unwrap().into_shape().unwrap().unwrap();
        for index in 0..2 {
            let part = settings.part(index).unwrap();
            part.set_shape(&shape).unwrap();
            part.set_motion_type(EMotionType::Dynamic).unwrap();
            part.set_object_layer(LAYER_MOVING).unwrap();
        }
        let joint = PointConstraintSettings::new(DVec3::ZERO, DVec3::ZERO).unwrap();
        settings.part(1).unwrap().set_to_parent(&joint).unwrap();

        assert!(settings.constraint_index_to_body_pair().unwrap().is_empty());
        let ragdoll = settings.create_ragdoll(1, 0, &world.system).unwrap().unwrap();
        assert_eq!(ragdoll.num_bodies().unwrap(), 2);
        assert_eq!(ragdoll.num_constraints().unwrap(), 0);
    }
}
