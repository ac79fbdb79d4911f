//! 约束与约束设置（原生侧）
//!
//! 约束创建时根据两个刚体当前的位姿计算局部坐标系，
//! 加入物理系统后只有两个刚体都在模拟中且约束启用时才生成 Rapier 关节。

use glam::DVec3;
use rapier3d::prelude::*;

use super::body::{self, BodyId};
use super::convert::local_frame;
use super::heap::{self, native_object, NativeFault};
use super::system;

/// 约束子类型，数值与宿主侧枚举一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintSubType {
    Fixed = 0,
    Point = 1,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstraintSettingsKind {
    /// `auto_detect_point` 为 true 时忽略两个点，取两刚体质心的中点
    Fixed {
        auto_detect_point: bool,
        point1: DVec3,
        point2: DVec3,
    },
    Point {
        point1: DVec3,
        point2: DVec3,
    },
}

impl ConstraintSettingsKind {
    pub fn sub_type(&self) -> ConstraintSubType {
        match self {
            ConstraintSettingsKind::Fixed { .. } => ConstraintSubType::Fixed,
            ConstraintSettingsKind::Point { .. } => ConstraintSubType::Point,
        }
    }
}

/// 约束的公共参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstraintParams {
    pub enabled: bool,
    pub priority: u32,
    pub num_velocity_steps_override: u32,
    pub num_position_steps_override: u32,
    pub user_data: u64,
}

impl Default for ConstraintParams {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 0,
            num_velocity_steps_override: 0,
            num_position_steps_override: 0,
            user_data: 0,
        }
    }
}

pub struct NativeConstraintSettings {
    pub kind: ConstraintSettingsKind,
    pub params: ConstraintParams,
}

native_object!(NativeConstraintSettings, "ConstraintSettings");

pub fn create_settings(kind: ConstraintSettingsKind) -> u64 {
    heap::alloc_target(NativeConstraintSettings {
        kind,
        params: ConstraintParams::default(),
    })
}

pub fn with_settings<R>(
    settings_va: u64,
    f: impl FnOnce(&NativeConstraintSettings) -> R,
) -> Result<R, NativeFault> {
    heap::with::<NativeConstraintSettings, _>(settings_va, f)
}

pub fn edit_settings<R>(
    settings_va: u64,
    f: impl FnOnce(&mut NativeConstraintSettings) -> R,
) -> Result<R, NativeFault> {
    heap::with_mut::<NativeConstraintSettings, _>(settings_va, f)
}

/// 双刚体约束（可计数）
pub struct NativeConstraint {
    pub sub_type: ConstraintSubType,
    /// 刚体代理的裸地址
    pub body1: u64,
    pub body2: u64,
    pub id1: BodyId,
    pub id2: BodyId,
    pub frame1: Pose,
    pub frame2: Pose,
    pub params: ConstraintParams,
    /// 所在物理系统，未加入时为 0
    pub system: u64,
}

native_object!(NativeConstraint, "Constraint");

impl NativeConstraint {
    pub fn build_joint(&self) -> GenericJoint {
        let axes = match self.sub_type {
            ConstraintSubType::Fixed => JointAxesMask::LOCKED_FIXED_AXES,
            ConstraintSubType::Point => JointAxesMask::LOCKED_SPHERICAL_AXES,
        };
        GenericJointBuilder::new(axes)
            .local_frame1(self.frame1)
            .local_frame2(self.frame2)
            .build()
    }
}

/// 用设置连接两个刚体，返回新约束地址；两个刚体不在同一物理系统时返回 0
pub fn create_constraint(settings_va: u64, body1_va: u64, body2_va: u64) -> Result<u64, NativeFault> {
    let (kind, params) = with_settings(settings_va, |s| (s.kind, s.params))?;
    let (system1, id1) = body::body_location(body1_va)?;
    let (system2, id2) = body::body_location(body2_va)?;
    if system1 != system2 {
        log::warn!("[约束] 刚体 {} 与 {} 不在同一物理系统", id1, id2);
        return Ok(0);
    }
    let Some((pose1, com1)) = system::body_pose(system1, id1)? else {
        return Ok(0);
    };
    let Some((pose2, com2)) = system::body_pose(system1, id2)? else {
        return Ok(0);
    };

    let (point1, point2) = match kind {
        ConstraintSettingsKind::Fixed { auto_detect_point: true, .. } => {
            let mid = (com1 + com2) * 0.5;
            (mid, mid)
        }
        ConstraintSettingsKind::Fixed { point1, point2, .. }
        | ConstraintSettingsKind::Point { point1, point2 } => (point1, point2),
    };

    Ok(heap::alloc_target(NativeConstraint {
        sub_type: kind.sub_type(),
        body1: body1_va,
        body2: body2_va,
        id1,
        id2,
        frame1: local_frame(&pose1, point1),
        frame2: local_frame(&pose2, point2),
        params,
        system: 0,
    }))
}

pub fn with_constraint<R>(
    constraint_va: u64,
    f: impl FnOnce(&NativeConstraint) -> R,
) -> Result<R, NativeFault> {
    heap::with::<NativeConstraint, _>(constraint_va, f)
}

/// 修改约束参数；已加入物理系统时同步关节
pub fn edit_params<R>(
    constraint_va: u64,
    f: impl FnOnce(&mut ConstraintParams) -> R,
) -> Result<R, NativeFault> {
    let (result, system_va) =
        heap::with_mut::<NativeConstraint, _>(constraint_va, |c| (f(&mut c.params), c.system))?;
    if system_va != 0 && heap::is_live(system_va) {
        system::sync_constraint(system_va, constraint_va)?;
    }
    Ok(result)
}

pub fn set_system(constraint_va: u64, system_va: u64) -> Result<(), NativeFault> {
    heap::with_mut::<NativeConstraint, _>(constraint_va, |c| c.system = system_va)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let va = create_settings(ConstraintSettingsKind::Point {
            point1: DVec3::ZERO,
            point2: DVec3::ZERO,
        });
        heap::add_ref(va).unwrap();
        let (sub_type, params) = with_settings(va, |s| (s.kind.sub_type(), s.params)).unwrap();
        assert_eq!(sub_type, ConstraintSubType::Point);
        assert!(params.enabled);
        edit_settings(va, |s| s.params.priority = 3).unwrap();
        assert_eq!(with_settings(va, |s| s.params.priority).unwrap(), 3);
        heap::release_ref(va).unwrap();
        assert!(!heap::is_live(va));
    }

    #[test]
    fn test_joint_axes_follow_sub_type() {
        let origin = Pose::from_translation(Vector::new(0.0, 0.0, 0.0));
        let constraint = NativeConstraint {
            sub_type: ConstraintSubType::Point,
            body1: 0,
            body2: 0,
            id1: BodyId::new(0, 0),
            id2: BodyId::new(1, 0),
            frame1: origin,
            frame2: origin,
            params: ConstraintParams::default(),
            system: 0,
        };
        let joint = constraint.build_joint();
        assert!(joint.locked_axes.contains(JointAxesMask::LIN_X));
        assert!(!joint.locked_axes.contains(JointAxesMask::ANG_X));
    }
}
