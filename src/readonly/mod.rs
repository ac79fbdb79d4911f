//! 只读能力接口
//!
//! 这些 trait 只包含查询，不转移所有权也不修改原生对象。
//! 具体包装与指向它们的计数引用都实现同一组接口，
//! 因此接受 `&impl ConstShape` 的函数既能接收 `Shape`，也能接收 `ShapeRef`。

mod enums;

pub use enums::*;

use glam::{DMat4, DVec3, Quat, Vec3};

use crate::native::body::{self, BodyId};
use crate::native::constraint;
use crate::native::ragdoll::{self, SkeletonJoint};
use crate::native::{material, shape, system};
use crate::{BridgeError, Result};

/// 只读接口的公共入口：查询作用的原生地址
pub trait NativeView {
    fn view_va(&self) -> Result<u64>;
}

fn present<T>(value: Option<T>, kind: &'static str) -> Result<T> {
    value.ok_or(BridgeError::InvalidHandle { kind })
}

// ============================================================================
// 材质与形状
// ============================================================================

pub trait ConstPhysicsMaterial: NativeView {
    fn debug_name(&self) -> Result<String> {
        Ok(material::debug_name(self.view_va()?)?)
    }

    fn debug_color(&self) -> Result<u32> {
        Ok(material::debug_color(self.view_va()?)?)
    }
}

pub trait ConstShapeSettings: NativeView {
    fn sub_type(&self) -> Result<EShapeSubType> {
        Ok(shape::with_settings(self.view_va()?, |s| s.kind.sub_type())?)
    }

    fn density(&self) -> Result<f32> {
        Ok(shape::with_settings(self.view_va()?, |s| s.density)?)
    }

    fn user_data(&self) -> Result<u64> {
        Ok(shape::with_settings(self.view_va()?, |s| s.user_data)?)
    }

    /// 未设置材质时为 0
    fn material_va(&self) -> Result<u64> {
        Ok(shape::with_settings(self.view_va()?, |s| s.material)?)
    }
}

pub trait ConstShape: NativeView {
    fn sub_type(&self) -> Result<EShapeSubType> {
        Ok(shape::with_shape(self.view_va()?, |s| s.sub_type)?)
    }

    fn shape_type(&self) -> Result<EShapeType> {
        Ok(ConstShape::sub_type(self)?.into())
    }

    /// 局部包围盒 (min, max)
    fn local_bounds(&self) -> Result<(Vec3, Vec3)> {
        Ok(shape::local_bounds(self.view_va()?)?)
    }

    fn center_of_mass(&self) -> Result<Vec3> {
        Ok(shape::center_of_mass(self.view_va()?)?)
    }

    fn volume(&self) -> Result<f32> {
        Ok(shape::volume(self.view_va()?)?)
    }

    fn mass(&self) -> Result<f32> {
        Ok(shape::mass(self.view_va()?)?)
    }

    fn inner_radius(&self) -> Result<f32> {
        Ok(shape::with_shape(self.view_va()?, |s| s.inner_radius)?)
    }

    fn user_data(&self) -> Result<u64> {
        Ok(shape::with_shape(self.view_va()?, |s| s.user_data)?)
    }

    /// 只有凸形状有密度
    fn density(&self) -> Result<Option<f32>> {
        Ok(shape::with_shape(self.view_va()?, |s| s.sub_type.is_convex().then_some(s.density))?)
    }

    fn num_sub_shapes(&self) -> Result<usize> {
        Ok(shape::with_shape(self.view_va()?, |s| s.children.len())?)
    }
}

// ============================================================================
// 刚体
// ============================================================================

pub trait ConstBodyCreationSettings: NativeView {
    fn position(&self) -> Result<DVec3> {
        Ok(body::settings_data(self.view_va()?)?.position)
    }

    fn rotation(&self) -> Result<Quat> {
        Ok(body::settings_data(self.view_va()?)?.rotation)
    }

    fn linear_velocity(&self) -> Result<Vec3> {
        Ok(body::settings_data(self.view_va()?)?.linear_velocity)
    }

    fn angular_velocity(&self) -> Result<Vec3> {
        Ok(body::settings_data(self.view_va()?)?.angular_velocity)
    }

    fn motion_type(&self) -> Result<EMotionType> {
        Ok(body::settings_data(self.view_va()?)?.motion_type)
    }

    fn object_layer(&self) -> Result<u32> {
        Ok(body::settings_data(self.view_va()?)?.object_layer)
    }

    fn friction(&self) -> Result<f32> {
        Ok(body::settings_data(self.view_va()?)?.friction)
    }

    fn restitution(&self) -> Result<f32> {
        Ok(body::settings_data(self.view_va()?)?.restitution)
    }

    fn gravity_factor(&self) -> Result<f32> {
        Ok(body::settings_data(self.view_va()?)?.gravity_factor)
    }

    fn is_sensor(&self) -> Result<bool> {
        Ok(body::settings_data(self.view_va()?)?.is_sensor)
    }

    fn allow_sleeping(&self) -> Result<bool> {
        Ok(body::settings_data(self.view_va()?)?.allow_sleeping)
    }

    fn user_data(&self) -> Result<u64> {
        Ok(body::settings_data(self.view_va()?)?.user_data)
    }

    fn has_shape(&self) -> Result<bool> {
        let data = body::settings_data(self.view_va()?)?;
        Ok(data.shape != 0 || data.shape_settings != 0)
    }
}

/// 刚体查询经由刚体代理找到所在系统
pub trait ConstBody: NativeView {
    fn location(&self) -> Result<(u64, BodyId)> {
        Ok(body::body_location(self.view_va()?)?)
    }

    fn id(&self) -> Result<BodyId> {
        Ok(self.location()?.1)
    }

    fn position(&self) -> Result<DVec3> {
        let (sys, id) = self.location()?;
        present(system::position(sys, id)?, "Body")
    }

    fn rotation(&self) -> Result<Quat> {
        let (sys, id) = self.location()?;
        present(system::rotation(sys, id)?, "Body")
    }

    fn center_of_mass_position(&self) -> Result<DVec3> {
        let (sys, id) = self.location()?;
        present(system::center_of_mass_position(sys, id)?, "Body")
    }

    fn world_transform(&self) -> Result<DMat4> {
        let (sys, id) = self.location()?;
        present(system::world_transform(sys, id)?, "Body")
    }

    fn linear_velocity(&self) -> Result<Vec3> {
        let (sys, id) = self.location()?;
        present(system::linear_velocity(sys, id)?, "Body")
    }

    fn angular_velocity(&self) -> Result<Vec3> {
        let (sys, id) = self.location()?;
        present(system::angular_velocity(sys, id)?, "Body")
    }

    fn motion_type(&self) -> Result<EMotionType> {
        let (sys, id) = self.location()?;
        present(system::read_body(sys, id, |record, _| record.motion_type)?, "Body")
    }

    fn object_layer(&self) -> Result<u32> {
        let (sys, id) = self.location()?;
        present(system::read_body(sys, id, |record, _| record.object_layer)?, "Body")
    }

    fn user_data(&self) -> Result<u64> {
        let (sys, id) = self.location()?;
        present(system::read_body(sys, id, |record, _| record.user_data)?, "Body")
    }

    fn is_static(&self) -> Result<bool> {
        Ok(self.motion_type()? == EMotionType::Static)
    }

    fn is_active(&self) -> Result<bool> {
        let (sys, id) = self.location()?;
        Ok(system::is_active(sys, id)?)
    }

    fn is_in_broad_phase(&self) -> Result<bool> {
        let (sys, id) = self.location()?;
        Ok(system::is_added(sys, id)?)
    }
}

// ============================================================================
// 约束
// ============================================================================

pub trait ConstConstraintSettings: NativeView {
    fn sub_type(&self) -> Result<EConstraintSubType> {
        Ok(constraint::with_settings(self.view_va()?, |s| s.kind.sub_type())?)
    }

    fn enabled(&self) -> Result<bool> {
        Ok(constraint::with_settings(self.view_va()?, |s| s.params.enabled)?)
    }

    fn priority(&self) -> Result<u32> {
        Ok(constraint::with_settings(self.view_va()?, |s| s.params.priority)?)
    }

    fn user_data(&self) -> Result<u64> {
        Ok(constraint::with_settings(self.view_va()?, |s| s.params.user_data)?)
    }
}

pub trait ConstConstraint: NativeView {
    fn sub_type(&self) -> Result<EConstraintSubType> {
        Ok(constraint::with_constraint(self.view_va()?, |c| c.sub_type)?)
    }

    fn constraint_type(&self) -> Result<EConstraintType> {
        Ok(ConstConstraint::sub_type(self)?.into())
    }

    fn enabled(&self) -> Result<bool> {
        Ok(constraint::with_constraint(self.view_va()?, |c| c.params.enabled)?)
    }

    fn priority(&self) -> Result<u32> {
        Ok(constraint::with_constraint(self.view_va()?, |c| c.params.priority)?)
    }

    fn num_velocity_steps_override(&self) -> Result<u32> {
        Ok(constraint::with_constraint(self.view_va()?, |c| c.params.num_velocity_steps_override)?)
    }

    fn num_position_steps_override(&self) -> Result<u32> {
        Ok(constraint::with_constraint(self.view_va()?, |c| c.params.num_position_steps_override)?)
    }

    fn user_data(&self) -> Result<u64> {
        Ok(constraint::with_constraint(self.view_va()?, |c| c.params.user_data)?)
    }

    fn body_ids(&self) -> Result<(BodyId, BodyId)> {
        Ok(constraint::with_constraint(self.view_va()?, |c| (c.id1, c.id2))?)
    }
}

// ============================================================================
// 骨架与布娃娃设置
// ============================================================================

pub trait ConstSkeleton: NativeView {
    fn num_joints(&self) -> Result<u32> {
        Ok(ragdoll::num_joints(self.view_va()?)?)
    }

    fn joint(&self, index: u32) -> Result<SkeletonJoint> {
        let va = self.view_va()?;
        let count = ragdoll::num_joints(va)?;
        crate::check_index("joint", index as u64, count as u64)?;
        present(ragdoll::joint(va, index)?, "Skeleton")
    }

    /// 找不到时为 -1
    fn joint_index(&self, name: &str) -> Result<i32> {
        Ok(ragdoll::joint_index(self.view_va()?, name)?)
    }

    fn are_joints_correctly_ordered(&self) -> Result<bool> {
        Ok(ragdoll::are_joints_correctly_ordered(self.view_va()?)?)
    }
}

pub trait ConstRagdollSettings: NativeView {
    fn num_parts(&self) -> Result<u32> {
        Ok(ragdoll::num_parts(self.view_va()?)?)
    }

    fn has_skeleton(&self) -> Result<bool> {
        Ok(ragdoll::skeleton(self.view_va()?)? != 0)
    }

    fn body_index_to_constraint_index(&self) -> Result<Vec<i32>> {
        Ok(ragdoll::body_index_to_constraint_index(self.view_va()?)?)
    }

    fn constraint_index_to_body_pair(&self) -> Result<Vec<(u32, u32)>> {
        Ok(ragdoll::constraint_index_to_body_pair(self.view_va()?)?)
    }
}

// ============================================================================
// 计数引用转发
// ============================================================================

macro_rules! forward_to_counted {
    ($($capability:ident),* $(,)?) => {
        $(
            impl<T: crate::lifetime::RefTarget + $capability> $capability for crate::lifetime::Ref<T> {}
            impl<T: crate::lifetime::RefTarget + $capability> $capability for crate::lifetime::RefC<T> {}
        )*
    };
}

forward_to_counted!(
    ConstPhysicsMaterial,
    ConstShapeSettings,
    ConstShape,
    ConstBodyCreationSettings,
    ConstBody,
    ConstConstraintSettings,
    ConstConstraint,
    ConstSkeleton,
    ConstRagdollSettings,
);
