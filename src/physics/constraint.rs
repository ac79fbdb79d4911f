//! 约束
//!
//! 约束设置与约束都可计数。约束只记录两个刚体代理的地址，
//! 由约束包装保活两个刚体包装。

use glam::DVec3;

use crate::lifetime::counted::{fresh_target, release_target};
use crate::lifetime::retention::{self, Relation};
use crate::lifetime::wrapper::native_wrapper;
use crate::lifetime::{NativeWrapper, Ref, RefC, RefTarget};
use crate::native::constraint::{self as native_constraint, ConstraintParams, ConstraintSettingsKind};
use crate::readonly::{ConstConstraint, ConstConstraintSettings};
use crate::{check_dvec3, Result};

use super::body::Body;

/// 所有双刚体约束设置的公共操作
pub trait TwoBodyConstraintSettings: RefTarget + ConstConstraintSettings {
    fn edit_params(&self, f: impl FnOnce(&mut ConstraintParams)) -> Result<()> {
        native_constraint::edit_settings(self.va()?, |s| f(&mut s.params))?;
        Ok(())
    }

    fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.edit_params(|p| p.enabled = enabled)
    }

    fn set_priority(&self, priority: u32) -> Result<()> {
        self.edit_params(|p| p.priority = priority)
    }

    fn set_num_velocity_steps_override(&self, steps: u32) -> Result<()> {
        self.edit_params(|p| p.num_velocity_steps_override = steps)
    }

    fn set_num_position_steps_override(&self, steps: u32) -> Result<()> {
        self.edit_params(|p| p.num_position_steps_override = steps)
    }

    fn set_user_data(&self, user_data: u64) -> Result<()> {
        self.edit_params(|p| p.user_data = user_data)
    }

    /// 按两个刚体当前的位姿建立约束；刚体不在同一系统或已不存在时返回 `None`
    fn create_constraint(&self, body1: &Body, body2: &Body) -> Result<Option<Constraint>> {
        let va = native_constraint::create_constraint(self.va()?, body1.va()?, body2.va()?)?;
        if va == 0 {
            return Ok(None);
        }
        let constraint: Constraint = fresh_target(va)?;
        retention::retain(&constraint, Relation::BODY1, body1);
        retention::retain(&constraint, Relation::BODY2, body2);
        Ok(Some(constraint))
    }
}

pub type ConstraintSettingsRef<T> = Ref<T>;

native_wrapper!(
    /// 固定约束：两个刚体之间没有相对运动
    FixedConstraintSettings,
    "ConstraintSettings",
    release_target
);

impl RefTarget for FixedConstraintSettings {}
impl ConstConstraintSettings for FixedConstraintSettings {}
impl TwoBodyConstraintSettings for FixedConstraintSettings {}

impl FixedConstraintSettings {
    /// 连接点取两个刚体质心的中点
    pub fn new_auto_detect() -> Result<Self> {
        fresh_target(native_constraint::create_settings(ConstraintSettingsKind::Fixed {
            auto_detect_point: true,
            point1: DVec3::ZERO,
            point2: DVec3::ZERO,
        }))
    }

    /// 两个世界坐标的连接点
    pub fn with_points(point1: DVec3, point2: DVec3) -> Result<Self> {
        check_dvec3("point1", point1)?;
        check_dvec3("point2", point2)?;
        fresh_target(native_constraint::create_settings(ConstraintSettingsKind::Fixed {
            auto_detect_point: false,
            point1,
            point2,
        }))
    }

    pub fn auto_detect_point(&self) -> Result<bool> {
        Ok(native_constraint::with_settings(self.va()?, |s| {
            matches!(s.kind, ConstraintSettingsKind::Fixed { auto_detect_point: true, .. })
        })?)
    }
}

native_wrapper!(
    /// 点约束：两个刚体共享一个点，可以绕它自由转动
    PointConstraintSettings,
    "ConstraintSettings",
    release_target
);

impl RefTarget for PointConstraintSettings {}
impl ConstConstraintSettings for PointConstraintSettings {}
impl TwoBodyConstraintSettings for PointConstraintSettings {}

impl PointConstraintSettings {
    pub fn new(point1: DVec3, point2: DVec3) -> Result<Self> {
        check_dvec3("point1", point1)?;
        check_dvec3("point2", point2)?;
        fresh_target(native_constraint::create_settings(ConstraintSettingsKind::Point { point1, point2 }))
    }

    pub fn points(&self) -> Result<(DVec3, DVec3)> {
        Ok(native_constraint::with_settings(self.va()?, |s| match s.kind {
            ConstraintSettingsKind::Fixed { point1, point2, .. } | ConstraintSettingsKind::Point { point1, point2 } => {
                (point1, point2)
            }
        })?)
    }
}

// ============================================================================
// 约束
// ============================================================================

native_wrapper!(
    /// 双刚体约束（可计数）；加入物理系统后注册表持有一次计数
    Constraint,
    "Constraint",
    release_target
);

impl RefTarget for Constraint {}
impl ConstConstraint for Constraint {}

pub type ConstraintRef = Ref<Constraint>;
pub type ConstraintRefC = RefC<Constraint>;

impl Constraint {
    pub(crate) fn share(va: u64) -> Result<Self> {
        fresh_target(va)
    }

    fn edit(&self, f: impl FnOnce(&mut ConstraintParams)) -> Result<()> {
        native_constraint::edit_params(self.va()?, f)?;
        Ok(())
    }

    /// 禁用的约束在模拟中不生效
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.edit(|p| p.enabled = enabled)
    }

    pub fn set_priority(&self, priority: u32) -> Result<()> {
        self.edit(|p| p.priority = priority)
    }

    pub fn set_num_velocity_steps_override(&self, steps: u32) -> Result<()> {
        self.edit(|p| p.num_velocity_steps_override = steps)
    }

    pub fn set_num_position_steps_override(&self, steps: u32) -> Result<()> {
        self.edit(|p| p.num_position_steps_override = steps)
    }

    pub fn set_user_data(&self, user_data: u64) -> Result<()> {
        self.edit(|p| p.user_data = user_data)
    }

    pub fn body1(&self) -> Option<Body> {
        retention::retained(self, Relation::BODY1)
    }

    pub fn body2(&self) -> Option<Body> {
        retention::retained(self, Relation::BODY2)
    }
}
