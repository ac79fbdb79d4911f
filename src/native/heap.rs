//! 原生对象堆
//!
//! 原生侧所有对象都存放在这里，按"虚拟地址"寻址。地址单调递增、永不复用，
//! 因此过期句柄不会误指向新对象，而是得到 [`NativeFault::Dangling`]。
//!
//! 可计数对象（RefTarget）在槽位内嵌引用计数，计数归零时由堆负责释放。

use once_cell::sync::Lazy;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

use crate::config::get_config;

/// 第一个分配的地址
const BASE_ADDRESS: u64 = 0x7f00_0001_0000;
/// 相邻两次分配的地址间隔
const ADDRESS_STRIDE: u64 = 0x40;

/// 原生侧错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NativeFault {
    #[error("null native address")]
    Null,

    #[error("no live native object at {0:#x}")]
    Dangling(u64),

    #[error("native object at {va:#x} is a {found}, expected {expected}")]
    TypeMismatch {
        va: u64,
        expected: &'static str,
        found: &'static str,
    },

    #[error("native object at {0:#x} is not reference counted")]
    NotCounted(u64),

    #[error("native object at {0:#x} has a poisoned lock")]
    Poisoned(u64),

    #[error("{what} index {index} out of range (len {len})")]
    OutOfRange {
        what: &'static str,
        index: i64,
        len: usize,
    },
}

/// 原生对象
///
/// `held_refs` 返回本对象持有一次计数的目标，`embedded_children` 返回随本对象
/// 一起释放的内嵌对象。`on_free` 在对象离开堆之后、释放它持有的引用之前调用。
pub trait NativeObject: Any + Send {
    fn type_name(&self) -> &'static str;

    fn held_refs(&self) -> Vec<u64> {
        Vec::new()
    }

    fn embedded_children(&self) -> Vec<u64> {
        Vec::new()
    }

    fn on_free(&mut self, _va: u64) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// 为类型实现 [`NativeObject`] 的样板部分
macro_rules! native_object {
    ($ty:ty, $name:expr) => {
        $crate::native::heap::native_object!($ty, $name, {});
    };
    ($ty:ty, $name:expr, { $($body:tt)* }) => {
        impl $crate::native::heap::NativeObject for $ty {
            fn type_name(&self) -> &'static str {
                $name
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }

            $($body)*
        }
    };
}
pub(crate) use native_object;

struct Slot {
    type_name: &'static str,
    counted: bool,
    refs: AtomicU32,
    embedded: AtomicBool,
    object: Mutex<Box<dyn NativeObject>>,
}

struct NativeHeap {
    slots: RwLock<HashMap<u64, Arc<Slot>>>,
    next_address: AtomicU64,
}

static HEAP: Lazy<NativeHeap> = Lazy::new(|| NativeHeap {
    slots: RwLock::new(HashMap::new()),
    next_address: AtomicU64::new(BASE_ADDRESS),
});

fn insert(object: Box<dyn NativeObject>, counted: bool) -> u64 {
    let va = HEAP.next_address.fetch_add(ADDRESS_STRIDE, Ordering::Relaxed);
    let type_name = object.type_name();
    let slot = Arc::new(Slot {
        type_name,
        counted,
        refs: AtomicU32::new(0),
        embedded: AtomicBool::new(false),
        object: Mutex::new(object),
    });
    let mut slots = match HEAP.slots.write() {
        Ok(slots) => slots,
        Err(poisoned) => poisoned.into_inner(),
    };
    slots.insert(va, slot);
    if get_config().trace_allocations {
        log::trace!("[原生堆] new {} @ {:#x}", type_name, va);
    }
    va
}

fn slot(va: u64) -> Result<Arc<Slot>, NativeFault> {
    if va == 0 {
        return Err(NativeFault::Null);
    }
    let slots = match HEAP.slots.read() {
        Ok(slots) => slots,
        Err(poisoned) => poisoned.into_inner(),
    };
    slots.get(&va).cloned().ok_or_else(|| {
        log::error!("[原生堆] 访问已失效的地址 {:#x}", va);
        NativeFault::Dangling(va)
    })
}

/// 分配不计数的对象
pub fn alloc<T: NativeObject>(object: T) -> u64 {
    insert(Box::new(object), false)
}

/// 分配可计数对象，初始计数为 0
pub fn alloc_target<T: NativeObject>(object: T) -> u64 {
    insert(Box::new(object), true)
}

/// 释放对象，并级联释放它持有的引用和内嵌对象
pub fn free(va: u64) -> Result<(), NativeFault> {
    if va == 0 {
        return Err(NativeFault::Null);
    }
    let removed = {
        let mut slots = match HEAP.slots.write() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.remove(&va)
    };
    let Some(slot) = removed else {
        log::error!("[原生堆] 重复释放或释放未知地址 {:#x}", va);
        return Err(NativeFault::Dangling(va));
    };
    if get_config().trace_allocations {
        log::trace!("[原生堆] delete {} @ {:#x}", slot.type_name, va);
    }

    let (held, children) = {
        let mut object = match slot.object.lock() {
            Ok(object) => object,
            Err(poisoned) => poisoned.into_inner(),
        };
        object.on_free(va);
        (object.held_refs(), object.embedded_children())
    };
    for target in held.into_iter().filter(|&t| t != 0) {
        if let Err(fault) = release_ref(target) {
            log::warn!("[原生堆] {:#x} 释放时归还引用 {:#x} 失败: {}", va, target, fault);
        }
    }
    for child in children.into_iter().filter(|&c| c != 0) {
        if let Err(fault) = free(child) {
            log::warn!("[原生堆] {:#x} 释放内嵌对象 {:#x} 失败: {}", va, child, fault);
        }
    }
    Ok(())
}

/// 只读访问对象
pub fn with<T: NativeObject, R>(va: u64, f: impl FnOnce(&T) -> R) -> Result<R, NativeFault> {
    let slot = slot(va)?;
    let object = slot.object.lock().map_err(|_| NativeFault::Poisoned(va))?;
    match object.as_any().downcast_ref::<T>() {
        Some(typed) => Ok(f(typed)),
        None => Err(NativeFault::TypeMismatch {
            va,
            expected: std::any::type_name::<T>(),
            found: slot.type_name,
        }),
    }
}

/// 可写访问对象
pub fn with_mut<T: NativeObject, R>(
    va: u64,
    f: impl FnOnce(&mut T) -> R,
) -> Result<R, NativeFault> {
    let slot = slot(va)?;
    let mut object = slot.object.lock().map_err(|_| NativeFault::Poisoned(va))?;
    let found = slot.type_name;
    match object.as_any_mut().downcast_mut::<T>() {
        Some(typed) => Ok(f(typed)),
        None => Err(NativeFault::TypeMismatch {
            va,
            expected: std::any::type_name::<T>(),
            found,
        }),
    }
}

/// 计数加一
pub fn add_ref(va: u64) -> Result<u32, NativeFault> {
    let slot = slot(va)?;
    if !slot.counted {
        return Err(NativeFault::NotCounted(va));
    }
    Ok(slot.refs.fetch_add(1, Ordering::AcqRel) + 1)
}

/// 计数减一，归零且未内嵌时释放目标
pub fn release_ref(va: u64) -> Result<u32, NativeFault> {
    let slot = slot(va)?;
    if !slot.counted {
        return Err(NativeFault::NotCounted(va));
    }
    let previous = slot
        .refs
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .map_err(|_| {
            log::error!("[原生堆] {:#x} 的引用计数下溢", va);
            NativeFault::Dangling(va)
        })?;
    let remaining = previous - 1;
    if remaining == 0 && !slot.embedded.load(Ordering::Acquire) {
        drop(slot);
        free(va)?;
    }
    Ok(remaining)
}

/// 当前计数
pub fn ref_count(va: u64) -> Result<u32, NativeFault> {
    let slot = slot(va)?;
    if !slot.counted {
        return Err(NativeFault::NotCounted(va));
    }
    Ok(slot.refs.load(Ordering::Acquire))
}

/// 标记为内嵌：计数归零也不再释放
pub fn set_embedded(va: u64) -> Result<(), NativeFault> {
    let slot = slot(va)?;
    if !slot.counted {
        return Err(NativeFault::NotCounted(va));
    }
    slot.embedded.store(true, Ordering::Release);
    Ok(())
}

pub fn is_embedded(va: u64) -> bool {
    slot(va)
        .map(|slot| slot.embedded.load(Ordering::Acquire))
        .unwrap_or(false)
}

/// 是否为引用计数对象；这类对象只能通过释放计数回收
pub fn is_counted(va: u64) -> bool {
    slot(va).map(|slot| slot.counted).unwrap_or(false)
}

/// 地址上是否仍有存活对象（不输出错误日志）
pub fn is_live(va: u64) -> bool {
    if va == 0 {
        return false;
    }
    let slots = match HEAP.slots.read() {
        Ok(slots) => slots,
        Err(poisoned) => poisoned.into_inner(),
    };
    slots.contains_key(&va)
}

/// 存活对象数量
pub fn live_objects() -> usize {
    match HEAP.slots.read() {
        Ok(slots) => slots.len(),
        Err(poisoned) => poisoned.into_inner().len(),
    }
}

/// 对象类型名
pub fn type_name(va: u64) -> Result<&'static str, NativeFault> {
    slot(va).map(|slot| slot.type_name)
}

// ============================================================================
// 引用单元
// ============================================================================

/// 引用单元：持有目标的一次计数
pub struct NativeRef {
    pub target: u64,
}

native_object!(NativeRef, "Ref", {
    fn held_refs(&self) -> Vec<u64> {
        vec![self.target]
    }
});

/// 创建指向 `target` 的引用单元；`target` 为 0 时表示空引用
pub fn ref_new(target: u64) -> Result<u64, NativeFault> {
    if target != 0 {
        add_ref(target)?;
    }
    Ok(alloc(NativeRef { target }))
}

/// 复制引用单元（目标计数加一）
pub fn ref_copy(ref_va: u64) -> Result<u64, NativeFault> {
    let target = ref_target(ref_va)?;
    ref_new(target)
}

/// 引用单元指向的目标
pub fn ref_target(ref_va: u64) -> Result<u64, NativeFault> {
    with::<NativeRef, _>(ref_va, |r| r.target)
}
