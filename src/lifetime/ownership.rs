//! 所有权记录
//!
//! 句柄加上可选的释放动作。释放动作存在当且仅当本记录是唯一负责释放的一方；
//! 它最多执行一次：显式 `release()`，或最后一个持有者离开作用域时的 `Drop`。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::handle::NativeHandle;
use crate::{BridgeError, Result};

/// 释放动作：调用对应的原生析构或递减
pub type ReleaseAction = Box<dyn FnOnce(NativeHandle) + Send>;

pub struct OwnershipRecord {
    kind: &'static str,
    handle: AtomicU64,
    release: Mutex<Option<ReleaseAction>>,
}

impl OwnershipRecord {
    /// 绑定句柄与释放动作（拥有）
    pub fn acquire(kind: &'static str, handle: NativeHandle, release: ReleaseAction) -> Arc<Self> {
        Arc::new(Self {
            kind,
            handle: AtomicU64::new(handle.va()),
            release: Mutex::new(Some(release)),
        })
    }

    /// 包装外部提供的句柄（不拥有）
    pub fn adopt(kind: &'static str, handle: NativeHandle) -> Arc<Self> {
        Arc::new(Self {
            kind,
            handle: AtomicU64::new(handle.va()),
            release: Mutex::new(None),
        })
    }

    fn action(&self) -> MutexGuard<'_, Option<ReleaseAction>> {
        match self.release.lock() {
            Ok(action) => action,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn handle(&self) -> NativeHandle {
        NativeHandle::new(self.handle.load(Ordering::Acquire))
    }

    /// 需要非空句柄的操作先调用它
    pub fn require(&self) -> Result<NativeHandle> {
        let handle = self.handle();
        if handle.is_null() {
            return Err(BridgeError::InvalidHandle { kind: self.kind });
        }
        Ok(handle)
    }

    pub fn owns(&self) -> bool {
        self.action().is_some()
    }

    /// 执行释放动作并清空句柄；返回本次是否真的执行了动作
    pub fn release(&self) -> bool {
        let action = self.action().take();
        let handle = NativeHandle::new(self.handle.swap(0, Ordering::AcqRel));
        match action {
            Some(action) if !handle.is_null() => {
                action(handle);
                true
            }
            _ => false,
        }
    }

    /// 所有权转移到别处：丢弃释放动作但不执行，句柄保持有效
    pub fn disown(&self) -> bool {
        self.action().take().is_some()
    }

    /// 重新取得所有权
    pub fn regain(&self, release: ReleaseAction) {
        *self.action() = Some(release);
    }

    /// 对象已被原生侧消耗：同时清空句柄与释放动作
    pub fn take(&self) -> NativeHandle {
        self.action().take();
        NativeHandle::new(self.handle.swap(0, Ordering::AcqRel))
    }
}

impl Drop for OwnershipRecord {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for OwnershipRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnershipRecord")
            .field("kind", &self.kind)
            .field("handle", &self.handle())
            .field("owns", &self.owns())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_release(counter: &Arc<AtomicU32>) -> ReleaseAction {
        let counter = Arc::clone(counter);
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_release_is_idempotent() {
        let released = Arc::new(AtomicU32::new(0));
        let record = OwnershipRecord::acquire("Dummy", NativeHandle::new(0x80), counting_release(&released));
        assert!(record.owns());
        assert!(record.release());
        assert!(!record.release());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(record.handle().is_null());
        assert_eq!(record.require(), Err(BridgeError::InvalidHandle { kind: "Dummy" }));
    }

    #[test]
    fn test_drop_releases_pending_owner() {
        let released = Arc::new(AtomicU32::new(0));
        {
            let _record = OwnershipRecord::acquire("Dummy", NativeHandle::new(0x80), counting_release(&released));
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_borrowed_record_never_releases() {
        let record = OwnershipRecord::adopt("Dummy", NativeHandle::new(0x80));
        assert!(!record.owns());
        assert!(!record.release());
        assert!(record.handle().is_null());
    }

    #[test]
    fn test_disown_and_regain() {
        let released = Arc::new(AtomicU32::new(0));
        let record = OwnershipRecord::acquire("Dummy", NativeHandle::new(0x80), counting_release(&released));
        assert!(record.disown());
        assert!(!record.owns());
        assert_eq!(record.handle(), NativeHandle::new(0x80));
        drop(Arc::clone(&record));
        assert_eq!(released.load(Ordering::SeqCst), 0);

        record.regain(counting_release(&released));
        drop(record);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_take_consumes_without_release() {
        let released = Arc::new(AtomicU32::new(0));
        let record = OwnershipRecord::acquire("Dummy", NativeHandle::new(0x80), counting_release(&released));
        assert_eq!(record.take(), NativeHandle::new(0x80));
        drop(record);
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }
}
