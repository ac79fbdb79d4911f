//! 运行时生命周期
//!
//! 初始化只记录状态并输出版本；关闭时拆除默认材质，并按配置清扫宿主已无法触及的所有权记录。
//! 宿主仍持有的包装在关闭后继续有效。
//! 精度模式在编译期固定为单精度。

use once_cell::sync::Lazy;
use std::sync::Mutex;

use crate::config::get_config;
use crate::lifetime::{wrapper, NativeWrapper};
use crate::native::{heap, material};
use crate::physics::PhysicsMaterial;
use crate::{BridgeError, Result};

pub const VERSION: &str = concat!("physics-bridge-", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Default)]
struct RuntimeState {
    initialized: bool,
    init_count: u32,
}

static RUNTIME: Lazy<Mutex<RuntimeState>> = Lazy::new(|| Mutex::new(RuntimeState::default()));

fn state() -> std::sync::MutexGuard<'static, RuntimeState> {
    match RUNTIME.lock() {
        Ok(state) => state,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 初始化运行时，返回这次调用是否真正完成了初始化（重复调用返回 false）
pub fn init_runtime() -> bool {
    let mut state = state();
    if state.initialized {
        return false;
    }
    state.initialized = true;
    state.init_count += 1;
    let config = get_config();
    log::info!(
        "[运行时] {} 初始化 (第 {} 次), 单精度, 求解器迭代 {}",
        VERSION,
        state.init_count,
        config.solver_iterations
    );
    true
}

pub fn is_initialized() -> bool {
    state().initialized
}

/// 关闭运行时，返回清扫掉的泄漏记录数量
///
/// 关闭后可以再次初始化；宿主仍持有的对象不受影响，只是默认材质会在下次使用时重建。
pub fn shutdown_runtime() -> usize {
    let mut state = state();
    if !state.initialized {
        log::warn!("[运行时] 未初始化就关闭");
    }
    state.initialized = false;
    drop(state);

    let swept = if get_config().sweep_leaks_on_shutdown {
        wrapper::sweep_leaks()
    } else {
        0
    };
    material::teardown_default_material();
    log::info!(
        "[运行时] 已关闭: 清扫 {} 条泄漏, 剩余原生对象 {}",
        swept,
        heap::live_objects()
    );
    swept
}

/// 默认材质单例；返回的包装持有一次计数
pub fn default_material() -> Result<PhysicsMaterial> {
    match material::default_material() {
        0 => Err(BridgeError::InvalidHandle {
            kind: PhysicsMaterial::TYPE_NAME,
        }),
        va => Ok(PhysicsMaterial::adopt(va)),
    }
}

/// 是否以双精度编译。Rapier 使用 f32 构建，这里恒为 false；位置在包装边界以 f64 传递。
pub fn is_double_precision() -> bool {
    false
}

/// 当前存活的原生对象数量（诊断用）
pub fn live_objects() -> usize {
    heap::live_objects()
}

/// 仍由宿主包装拥有的对象数量（诊断用）
pub fn tracked_owners() -> usize {
    wrapper::tracked_owners()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::physics::BoxShapeSettings;
    use crate::readonly::ConstPhysicsMaterial;
    use glam::Vec3;

    static SERIAL: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    /// 关闭运行时会拆除默认材质，相关测试需要串行
    pub(crate) fn serial() -> std::sync::MutexGuard<'static, ()> {
        match SERIAL.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[test]
    fn test_version_and_precision() {
        assert!(VERSION.starts_with("physics-bridge-"));
        assert!(!is_double_precision());
    }

    #[test]
    fn test_default_material_is_singleton() {
        let _guard = serial();
        let a = default_material().unwrap();
        let b = default_material().unwrap();
        assert!(a.same_native_object(&b));
        assert_eq!(a.debug_name().unwrap(), material::DEFAULT_NAME);
        assert_eq!(a.debug_color().unwrap(), material::DEFAULT_COLOR);
    }

    #[test]
    fn test_shutdown_keeps_held_wrappers_valid() {
        let _guard = serial();
        init_runtime();
        let settings = BoxShapeSettings::new(Vec3::splat(0.5)).unwrap();
        let held_material = default_material().unwrap();
        let va = settings.va().unwrap();

        shutdown_runtime();

        assert_eq!(settings.va().unwrap(), va);
        assert!(heap::is_live(va));
        settings.set_convex_radius(0.1).unwrap();
        assert_eq!(held_material.debug_name().unwrap(), material::DEFAULT_NAME);

        init_runtime();
        let fresh = default_material().unwrap();
        assert!(!fresh.same_native_object(&held_material));
        shutdown_runtime();
    }
}
