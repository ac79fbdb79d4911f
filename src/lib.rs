//! Physics Bridge - 宿主与原生物理引擎之间的所有权与生命周期桥
//!
//! 提供：
//! - 按地址寻址的原生对象堆与 Rapier 驱动的物理系统
//! - 句柄、所有权记录、对象包装与计数引用
//! - 别名保活与只读能力接口
//! - 类型化的物理包装（形状、刚体、约束、布娃娃等）
//! - JNI 接口

pub mod config;
pub mod jni_bridge;
pub mod lifetime;
pub mod native;
pub mod physics;
pub mod readonly;
pub mod runtime;

pub use config::{get_config, reset_config, set_config, BridgeConfig};
pub use lifetime::{NativeHandle, NativeWrapper, Ref, RefC, RefTarget};
pub use native::NativeFault;
pub use physics::{Body, BodyId, BodyInterface, PhysicsSystem, PhysicsUpdateError};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("invalid handle: {kind} has no native object")]
    InvalidHandle { kind: &'static str },

    #[error("ownership violation: {0}")]
    OwnershipViolation(String),

    #[error("non-finite {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },

    #[error("{what} index {index} out of range (limit {limit})")]
    OutOfRange {
        what: &'static str,
        index: u64,
        limit: u64,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("native error: {0}")]
    Native(#[from] NativeFault),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// 拒绝 NaN 与无穷
pub(crate) fn check_finite(what: &'static str, values: &[f64]) -> Result<()> {
    match values.iter().find(|v| !v.is_finite()) {
        Some(&value) => Err(BridgeError::NonFinite { what, value }),
        None => Ok(()),
    }
}

pub(crate) fn check_vec3(what: &'static str, v: glam::Vec3) -> Result<()> {
    check_finite(what, &[v.x as f64, v.y as f64, v.z as f64])
}

pub(crate) fn check_dvec3(what: &'static str, v: glam::DVec3) -> Result<()> {
    check_finite(what, &[v.x, v.y, v.z])
}

pub(crate) fn check_quat(what: &'static str, q: glam::Quat) -> Result<()> {
    check_finite(what, &[q.x as f64, q.y as f64, q.z as f64, q.w as f64])
}

pub(crate) fn check_index(what: &'static str, index: u64, limit: u64) -> Result<()> {
    if index >= limit {
        return Err(BridgeError::OutOfRange { what, index, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_checks() {
        assert!(check_finite("x", &[1.0, -2.0]).is_ok());
        assert_eq!(
            check_finite("x", &[1.0, f64::INFINITY]),
            Err(BridgeError::NonFinite { what: "x", value: f64::INFINITY })
        );
        assert!(check_vec3("v", glam::Vec3::new(0.0, f32::NAN, 0.0)).is_err());
        assert!(check_index("layer", 3, 3).is_err());
        assert!(check_index("layer", 2, 3).is_ok());
    }
}
