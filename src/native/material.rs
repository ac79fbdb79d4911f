//! 物理材质（原生侧）

use once_cell::sync::Lazy;
use std::sync::Mutex;

use super::heap::{self, native_object, NativeFault};

pub struct NativeMaterial {
    pub debug_name: String,
    /// 调试颜色 (0xAARRGGBB)
    pub debug_color: u32,
}

native_object!(NativeMaterial, "PhysicsMaterial");

pub const DEFAULT_NAME: &str = "Default";
pub const DEFAULT_COLOR: u32 = 0xff80_8080;

pub fn create(debug_name: &str, debug_color: u32) -> u64 {
    heap::alloc_target(NativeMaterial {
        debug_name: debug_name.to_owned(),
        debug_color,
    })
}

pub fn debug_name(material_va: u64) -> Result<String, NativeFault> {
    heap::with::<NativeMaterial, _>(material_va, |m| m.debug_name.clone())
}

pub fn debug_color(material_va: u64) -> Result<u32, NativeFault> {
    heap::with::<NativeMaterial, _>(material_va, |m| m.debug_color)
}

// ============================================================================
// 默认材质单例
// ============================================================================

/// 默认材质地址，0 表示尚未创建或已拆除
static DEFAULT_MATERIAL: Lazy<Mutex<u64>> = Lazy::new(|| Mutex::new(0));

/// 获取默认材质并为调用者加一次计数；首次调用时创建，单例自身另持有一次计数。
///
/// 计数在锁内完成，与拆除并发时调用者拿到的地址仍然有效。失败返回 0。
pub fn default_material() -> u64 {
    let mut va = match DEFAULT_MATERIAL.lock() {
        Ok(va) => va,
        Err(poisoned) => poisoned.into_inner(),
    };
    if *va == 0 || !heap::is_live(*va) {
        let created = create(DEFAULT_NAME, DEFAULT_COLOR);
        if heap::add_ref(created).is_ok() {
            *va = created;
            log::debug!("[材质] 创建默认材质 @ {:#x}", created);
        }
    }
    match heap::add_ref(*va) {
        Ok(_) => *va,
        Err(fault) => {
            log::error!("[材质] 获取默认材质失败: {}", fault);
            0
        }
    }
}

/// 拆除默认材质单例，返回它是否存在过
///
/// 仍被形状引用时，材质会在最后一个引用释放后才真正回收。
pub fn teardown_default_material() -> bool {
    let mut va = match DEFAULT_MATERIAL.lock() {
        Ok(va) => va,
        Err(poisoned) => poisoned.into_inner(),
    };
    if *va == 0 {
        return false;
    }
    let released = heap::release_ref(*va);
    if let Err(fault) = released {
        log::warn!("[材质] 拆除默认材质失败: {}", fault);
    }
    *va = 0;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_accessors() {
        let va = create("rubber", 0xff00_ff00);
        heap::add_ref(va).unwrap();
        assert_eq!(debug_name(va).unwrap(), "rubber");
        assert_eq!(debug_color(va).unwrap(), 0xff00_ff00);
        heap::release_ref(va).unwrap();
        assert!(!heap::is_live(va));
    }

    #[test]
    fn test_default_material_is_shared() {
        let _guard = crate::runtime::tests::serial();
        let a = default_material();
        let b = default_material();
        assert_eq!(a, b);
        assert_eq!(debug_name(a).unwrap(), DEFAULT_NAME);
        assert!(heap::ref_count(a).unwrap() >= 3);
        heap::release_ref(a).unwrap();
        heap::release_ref(b).unwrap();
    }
}
