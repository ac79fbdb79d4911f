//! 对象包装
//!
//! 宿主侧每个原生对象由一个包装表示。包装的克隆共享同一个 [`WrapperCore`]，
//! 相当于对同一包装的多个宿主引用；最后一个克隆离开作用域时所有权记录才会释放。
//!
//! 核心记录宿主持有数（类型化包装的数量，保活表里的持有不算）。
//! [`sweep_leaks`] 只回收宿主已无法触及的核心：从宿主持有的核心出发，
//! 沿容器与保活表走不到的仍拥有对象的核心。

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::handle::NativeHandle;
use super::ownership::OwnershipRecord;
use super::retention::KeepAlive;
use crate::native::heap;
use crate::{BridgeError, Result};

/// 包装的共享部分
///
/// 字段按声明顺序析构：先释放原生对象，再放开保活的其他包装。
pub struct WrapperCore {
    record: Arc<OwnershipRecord>,
    /// 内含视图的容器；容器释放后视图失效
    container: Option<Arc<WrapperCore>>,
    keep_alive: KeepAlive,
    host_holds: AtomicUsize,
    tracked: AtomicBool,
}

impl WrapperCore {
    pub fn new(record: Arc<OwnershipRecord>, container: Option<Arc<WrapperCore>>) -> Arc<Self> {
        Arc::new(Self {
            record,
            container,
            keep_alive: KeepAlive::default(),
            host_holds: AtomicUsize::new(0),
            tracked: AtomicBool::new(false),
        })
    }

    /// 当前有多少个类型化包装指向本核心
    pub fn host_holds(&self) -> usize {
        self.host_holds.load(Ordering::Acquire)
    }

    pub fn record(&self) -> &Arc<OwnershipRecord> {
        &self.record
    }

    pub fn container(&self) -> Option<&Arc<WrapperCore>> {
        self.container.as_ref()
    }

    pub fn keep_alive(&self) -> &KeepAlive {
        &self.keep_alive
    }

    /// 当前地址；自身或任一层容器已释放时失败
    pub fn va(&self) -> Result<u64> {
        let mut container = self.container.as_ref();
        while let Some(outer) = container {
            if outer.record.handle().is_null() {
                return Err(BridgeError::InvalidHandle {
                    kind: self.record.kind(),
                });
            }
            container = outer.container.as_ref();
        }
        Ok(self.record.require()?.va())
    }
}

/// 类型化包装对核心的一次宿主持有
pub struct HostHold(Arc<WrapperCore>);

impl HostHold {
    /// 先计数再登记，清扫永远不会看到计数为零的新核心
    pub fn new(core: Arc<WrapperCore>) -> Self {
        core.host_holds.fetch_add(1, Ordering::AcqRel);
        if !core.tracked.swap(true, Ordering::AcqRel) {
            track(&core);
        }
        Self(core)
    }
}

impl Clone for HostHold {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.0))
    }
}

impl Drop for HostHold {
    fn drop(&mut self) {
        self.0.host_holds.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Deref for HostHold {
    type Target = Arc<WrapperCore>;

    fn deref(&self) -> &Arc<WrapperCore> {
        &self.0
    }
}

/// 原生对象包装
pub trait NativeWrapper: Sized + Clone + Send + Sync {
    /// 用于错误信息与日志
    const TYPE_NAME: &'static str;

    fn core(&self) -> &Arc<WrapperCore>;

    fn from_core(core: Arc<WrapperCore>) -> Self;

    /// 释放本类型的原生对象（析构或递减）
    fn free_native(va: u64);

    fn va(&self) -> Result<u64> {
        self.core().va()
    }

    fn handle(&self) -> NativeHandle {
        self.core().record().handle()
    }

    fn has_assigned_native_object(&self) -> bool {
        self.va().is_ok()
    }

    fn owns_native_object(&self) -> bool {
        self.core().record().owns()
    }

    /// 显式释放；重复调用无效果。对不拥有的对象调用属于所有权错误。
    fn close(&self) -> Result<()> {
        let record = self.core().record();
        let handle = record.handle();
        if handle.is_null() {
            return Ok(());
        }
        if !record.owns() {
            return Err(BridgeError::OwnershipViolation(format!(
                "{} @ {} is not owned by this wrapper",
                Self::TYPE_NAME,
                handle
            )));
        }
        record.release();
        self.core().keep_alive().clear();
        Ok(())
    }

    /// 包装新分配的原生对象，拥有它
    fn adopt(va: u64) -> Self {
        let record = OwnershipRecord::acquire(
            Self::TYPE_NAME,
            NativeHandle::new(va),
            Box::new(|handle| Self::free_native(handle.va())),
        );
        Self::from_core(WrapperCore::new(record, None))
    }

    /// 包装外部提供的地址，不拥有
    fn borrowed(va: u64) -> Self {
        let record = OwnershipRecord::adopt(Self::TYPE_NAME, NativeHandle::new(va));
        Self::from_core(WrapperCore::new(record, None))
    }

    /// 位于 `container` 内部的对象：不拥有，且只在容器存活期间有效
    fn contained<C: NativeWrapper>(va: u64, container: &C) -> Self {
        Self::contained_in(va, Arc::clone(container.core()))
    }

    fn contained_in(va: u64, container: Arc<WrapperCore>) -> Self {
        let record = OwnershipRecord::adopt(Self::TYPE_NAME, NativeHandle::new(va));
        Self::from_core(WrapperCore::new(record, Some(container)))
    }

    fn same_native_object<O: NativeWrapper>(&self, other: &O) -> bool {
        let mine = self.handle();
        !mine.is_null() && mine == other.handle()
    }
}

// ============================================================================
// 泄漏追踪
// ============================================================================

/// 超过这个数量时先清理已失效的条目
const PRUNE_THRESHOLD: usize = 1024;

static CORE_TRACKER: Lazy<Mutex<Vec<Weak<WrapperCore>>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn tracker() -> MutexGuard<'static, Vec<Weak<WrapperCore>>> {
    match CORE_TRACKER.lock() {
        Ok(cores) => cores,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn track(core: &Arc<WrapperCore>) {
    let mut cores = tracker();
    if cores.len() >= PRUNE_THRESHOLD {
        cores.retain(|weak| weak.strong_count() > 0);
    }
    cores.push(Arc::downgrade(core));
}

fn live_cores() -> Vec<Arc<WrapperCore>> {
    let mut cores = tracker();
    cores.retain(|weak| weak.strong_count() > 0);
    cores.iter().filter_map(Weak::upgrade).collect()
}

/// 从宿主持有的核心出发，沿容器与保活表能走到的核心
fn reachable_from_host(cores: &[Arc<WrapperCore>]) -> HashSet<*const WrapperCore> {
    let mut reachable = HashSet::new();
    let mut pending: Vec<Arc<WrapperCore>> = cores.iter().filter(|core| core.host_holds() > 0).cloned().collect();
    while let Some(core) = pending.pop() {
        if !reachable.insert(Arc::as_ptr(&core)) {
            continue;
        }
        pending.extend(core.keep_alive.cores());
        if let Some(container) = &core.container {
            pending.push(Arc::clone(container));
        }
    }
    reachable
}

/// 释放宿主已无法触及、却仍拥有原生对象的包装（例如保活环），返回释放数量
///
/// 只作为兜底：每释放一条都会输出警告。宿主仍持有的包装及其保活的对象不受影响。
pub fn sweep_leaks() -> usize {
    let cores = live_cores();
    let reachable = reachable_from_host(&cores);
    let leaked: Vec<&Arc<WrapperCore>> = cores
        .iter()
        .filter(|core| !reachable.contains(&Arc::as_ptr(core)))
        .collect();

    let mut swept = 0;
    for core in &leaked {
        if core.record.owns() {
            log::warn!("[所有权] 回收泄漏的 {} @ {}", core.record.kind(), core.record.handle());
            if core.record.release() {
                swept += 1;
            }
        }
    }
    // 断开保活环，让核心本身也能析构
    for core in leaked {
        core.keep_alive.clear();
    }
    swept
}

/// 仍拥有原生对象的包装数量
pub fn tracked_owners() -> usize {
    live_cores().iter().filter(|core| core.record.owns()).count()
}

/// 释放不计数的原生对象
pub fn free_object(va: u64) {
    if let Err(fault) = heap::free(va) {
        log::error!("[包装] 释放 {:#x} 失败: {}", va, fault);
    }
}

/// 为包装类型实现 [`NativeWrapper`]
///
/// 第三个参数是释放函数：不计数对象用 [`free_object`]，
/// 可计数对象用 `release_target`。
macro_rules! native_wrapper {
    ($(#[$meta:meta])* $name:ident, $type_name:expr, $free:path) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            core: $crate::lifetime::wrapper::HostHold,
        }

        impl $crate::lifetime::wrapper::NativeWrapper for $name {
            const TYPE_NAME: &'static str = $type_name;

            fn core(&self) -> &::std::sync::Arc<$crate::lifetime::wrapper::WrapperCore> {
                &*self.core
            }

            fn from_core(core: ::std::sync::Arc<$crate::lifetime::wrapper::WrapperCore>) -> Self {
                Self {
                    core: $crate::lifetime::wrapper::HostHold::new(core),
                }
            }

            fn free_native(va: u64) {
                $free(va)
            }
        }

        impl $crate::readonly::NativeView for $name {
            fn view_va(&self) -> $crate::Result<u64> {
                $crate::lifetime::wrapper::NativeWrapper::va(self)
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                use $crate::lifetime::wrapper::NativeWrapper;
                write!(f, "{}({})", Self::TYPE_NAME, self.handle())
            }
        }
    };
}
pub(crate) use native_wrapper;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::retention;

    struct Dummy;
    heap::native_object!(Dummy, "Dummy");

    native_wrapper!(DummyWrapper, "Dummy", free_object);

    #[test]
    fn test_owning_wrapper_frees_on_last_drop() {
        let va = heap::alloc(Dummy);
        let wrapper = DummyWrapper::adopt(va);
        let clone = wrapper.clone();
        drop(wrapper);
        assert!(heap::is_live(va));
        assert_eq!(clone.va().unwrap(), va);
        drop(clone);
        assert!(!heap::is_live(va));
    }

    #[test]
    fn test_close_twice_is_a_no_op() {
        let va = heap::alloc(Dummy);
        let wrapper = DummyWrapper::adopt(va);
        wrapper.close().unwrap();
        wrapper.close().unwrap();
        assert!(!heap::is_live(va));
        assert!(!wrapper.has_assigned_native_object());
        assert_eq!(wrapper.va(), Err(BridgeError::InvalidHandle { kind: "Dummy" }));
    }

    #[test]
    fn test_closing_borrowed_wrapper_is_rejected() {
        let va = heap::alloc(Dummy);
        let borrowed = DummyWrapper::borrowed(va);
        assert!(matches!(borrowed.close(), Err(BridgeError::OwnershipViolation(_))));
        drop(borrowed);
        assert!(heap::is_live(va));
        heap::free(va).unwrap();
    }

    #[test]
    fn test_contained_view_dies_with_container() {
        let outer_va = heap::alloc(Dummy);
        let inner_va = heap::alloc(Dummy);
        let outer = DummyWrapper::adopt(outer_va);
        let inner = DummyWrapper::contained(inner_va, &outer);
        assert_eq!(inner.va().unwrap(), inner_va);
        assert!(inner.same_native_object(&DummyWrapper::borrowed(inner_va)));

        outer.close().unwrap();
        assert!(inner.va().is_err());
        heap::free(inner_va).unwrap();
    }

    #[test]
    fn test_clones_count_host_holds() {
        let wrapper = DummyWrapper::adopt(heap::alloc(Dummy));
        assert_eq!(wrapper.core().host_holds(), 1);
        let clone = wrapper.clone();
        assert_eq!(wrapper.core().host_holds(), 2);
        drop(clone);
        assert_eq!(wrapper.core().host_holds(), 1);
    }

    #[test]
    fn test_sweep_spares_wrappers_the_host_still_holds() {
        let va = heap::alloc(Dummy);
        let held = DummyWrapper::adopt(va);
        let child_va = heap::alloc(Dummy);
        let child = DummyWrapper::adopt(child_va);
        retention::pin(&held, &child);
        drop(child);

        sweep_leaks();
        assert!(heap::is_live(va));
        assert!(heap::is_live(child_va));
        assert_eq!(held.va().unwrap(), va);
        drop(held);
        assert!(!heap::is_live(child_va));
    }

    #[test]
    fn test_sweep_releases_unreachable_cycle() {
        let a_va = heap::alloc(Dummy);
        let b_va = heap::alloc(Dummy);
        let a = DummyWrapper::adopt(a_va);
        let b = DummyWrapper::adopt(b_va);
        retention::pin(&a, &b);
        retention::pin(&b, &a);
        drop(a);
        drop(b);

        sweep_leaks();
        assert!(!heap::is_live(a_va));
        assert!(!heap::is_live(b_va));
    }
}
