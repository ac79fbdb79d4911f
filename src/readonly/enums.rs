//! 类型标签

pub use crate::native::body::{Activation as EActivation, BodyState, MotionType as EMotionType};
pub use crate::native::constraint::ConstraintSubType as EConstraintSubType;
pub use crate::native::shape::SubType as EShapeSubType;

/// 形状大类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EShapeType {
    Convex,
    Compound,
}

impl From<EShapeSubType> for EShapeType {
    fn from(sub_type: EShapeSubType) -> Self {
        if sub_type.is_convex() {
            EShapeType::Convex
        } else {
            EShapeType::Compound
        }
    }
}

/// 约束大类；目前所有约束都连接两个刚体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EConstraintType {
    Constraint,
    TwoBodyConstraint,
}

impl From<EConstraintSubType> for EConstraintType {
    fn from(_: EConstraintSubType) -> Self {
        EConstraintType::TwoBodyConstraint
    }
}
