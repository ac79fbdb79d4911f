//! JNI 绑定层 - 与 Java 代码交互
//!
//! Java 侧只持有 `jlong` 地址。空地址一律返回 0/false，原生错误只记录日志。

mod native_func;

pub use native_func::*;

use jni::sys::{jboolean, jlong};

use crate::native::{body, heap, NativeFault};

/// 0 表示空句柄
fn address(handle: jlong) -> Option<u64> {
    if handle == 0 {
        None
    } else {
        Some(handle as u64)
    }
}

/// 原生错误只记录日志，不抛到 Java 侧
fn report<T>(what: &str, result: Result<T, NativeFault>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(fault) => {
            log::error!("[JNI] {} 失败: {}", what, fault);
            None
        }
    }
}

fn to_jboolean(value: bool) -> jboolean {
    if value { 1u8 } else { 0u8 }
}

fn finite(values: &[f64]) -> bool {
    if values.iter().all(|v| v.is_finite()) {
        true
    } else {
        log::warn!("[JNI] 参数包含 NaN 或无穷: {:?}", values);
        false
    }
}

/// 只释放不计数、且不归物理系统管理的对象
///
/// 计数对象要通过释放计数回收；刚体代理要通过 DestroyBody 销毁。
fn free_uncounted(va: u64) -> bool {
    if heap::is_counted(va) {
        log::warn!("[JNI] Free 拒绝计数对象 {:#x}，请释放计数", va);
        return false;
    }
    if body::body_location(va).is_ok() {
        log::warn!("[JNI] Free 拒绝刚体 {:#x}，请使用 DestroyBody", va);
        return false;
    }
    report("Free", heap::free(va)).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle_and_fault_reporting() {
        assert_eq!(address(0), None);
        assert_eq!(address(0x40), Some(0x40));
        assert_eq!(report::<u32>("测试", Err(NativeFault::Null)), None);
        assert_eq!(report("测试", Ok::<_, NativeFault>(3)), Some(3));
        assert_eq!(to_jboolean(true), 1);
        assert!(!finite(&[1.0, f64::NAN]));
    }

    #[test]
    fn test_free_rejects_counted_targets_and_bodies() {
        use crate::lifetime::NativeWrapper;
        use crate::native::job;
        use crate::physics::system::fixture::TestWorld;
        use crate::physics::PhysicsMaterial;

        let material = PhysicsMaterial::new("stone", 0).unwrap();
        let material_va = material.va().unwrap();
        assert!(!free_uncounted(material_va));
        assert!(heap::is_live(material_va));

        let world = TestWorld::new(4, 4);
        let body = world
            .system
            .body_interface()
            .unwrap()
            .create_body(&world.floor_settings())
            .unwrap()
            .unwrap();
        let body_va = body.va().unwrap();
        assert!(!free_uncounted(body_va));
        assert!(heap::is_live(body_va));

        let allocator = job::create_temp_allocator(64);
        assert!(free_uncounted(allocator));
        assert!(!heap::is_live(allocator));
        assert!(!free_uncounted(allocator));
    }
}
