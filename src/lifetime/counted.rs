//! 计数引用
//!
//! 原生侧的可计数对象通过引用单元共享。单元创建时目标计数加一，
//! 单元释放时减一，减到零由原生侧释放目标。宿主只能通过
//! 创建、复制、释放单元来影响计数。

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use super::wrapper::{free_object, HostHold, NativeWrapper, WrapperCore};
use crate::native::heap;
use crate::readonly::NativeView;
use crate::{BridgeError, Result};

/// 可计数的原生对象的包装
pub trait RefTarget: NativeWrapper {
    fn ref_count(&self) -> Result<u32> {
        Ok(heap::ref_count(self.va()?)?)
    }

    /// 标记为内嵌：计数归零也不释放，由所在的对象负责
    fn set_embedded(&self) -> Result<()> {
        Ok(heap::set_embedded(self.va()?)?)
    }

    fn to_ref(&self) -> Result<Ref<Self>> {
        Ref::create(self)
    }

    fn to_ref_c(&self) -> Result<RefC<Self>> {
        RefC::create(self)
    }
}

/// 包装刚分配的可计数对象：包装自身持有一次计数
pub(crate) fn fresh_target<T: RefTarget>(va: u64) -> Result<T> {
    heap::add_ref(va)?;
    Ok(T::adopt(va))
}

/// 可计数对象包装的释放动作
pub fn release_target(va: u64) {
    if let Err(fault) = heap::release_ref(va) {
        log::error!("[计数] 递减 {:#x} 失败: {}", va, fault);
    }
}

fn cell_target(cell: u64, kind: &'static str) -> Result<u64> {
    let target = heap::ref_target(cell)?;
    if target == 0 {
        return Err(BridgeError::InvalidHandle { kind });
    }
    Ok(target)
}

/// 可变的计数引用
pub struct Ref<T: RefTarget> {
    core: HostHold,
    _target: PhantomData<fn() -> T>,
}

/// 只读的计数引用，只提供目标的只读接口
pub struct RefC<T: RefTarget> {
    core: HostHold,
    _target: PhantomData<fn() -> T>,
}

/// 目标的借用视图，生命周期受引用单元约束
pub struct Borrowed<'a, T> {
    view: T,
    _cell: PhantomData<&'a ()>,
}

impl<T> Deref for Borrowed<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.view
    }
}

macro_rules! counted_cell {
    ($name:ident, $type_name:expr) => {
        impl<T: RefTarget> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self {
                    core: self.core.clone(),
                    _target: PhantomData,
                }
            }
        }

        impl<T: RefTarget> NativeWrapper for $name<T> {
            const TYPE_NAME: &'static str = $type_name;

            fn core(&self) -> &Arc<WrapperCore> {
                &*self.core
            }

            fn from_core(core: Arc<WrapperCore>) -> Self {
                Self {
                    core: HostHold::new(core),
                    _target: PhantomData,
                }
            }

            fn free_native(va: u64) {
                free_object(va)
            }
        }

        /// 只读接口作用在目标上
        impl<T: RefTarget> NativeView for $name<T> {
            fn view_va(&self) -> Result<u64> {
                cell_target(self.va()?, T::TYPE_NAME)
            }
        }

        impl<T: RefTarget> $name<T> {
            pub fn create(target: &T) -> Result<Self> {
                let cell = heap::ref_new(target.va()?)?;
                Ok(Self::adopt(cell))
            }

            /// 指向空的引用
            pub fn empty() -> Result<Self> {
                Ok(Self::adopt(heap::ref_new(0)?))
            }

            /// 目标地址，空引用为 0
            pub fn target_va(&self) -> Result<u64> {
                Ok(heap::ref_target(self.va()?)?)
            }

            pub fn is_empty(&self) -> bool {
                !matches!(self.target_va(), Ok(target) if target != 0)
            }

            pub fn target_ref_count(&self) -> Result<u32> {
                let target = cell_target(self.va()?, T::TYPE_NAME)?;
                Ok(heap::ref_count(target)?)
            }

            /// 新的引用单元，目标计数加一
            pub fn duplicate(&self) -> Result<Self> {
                Ok(Self::adopt(heap::ref_copy(self.va()?)?))
            }
        }

        impl<T: RefTarget> std::fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}<{}>({})", $type_name, T::TYPE_NAME, self.handle())
            }
        }
    };
}

counted_cell!(Ref, "Ref");
counted_cell!(RefC, "RefC");

impl<T: RefTarget> Ref<T> {
    pub fn to_ref(&self) -> Result<Ref<T>> {
        self.duplicate()
    }

    pub fn to_ref_c(&self) -> Result<RefC<T>> {
        Ok(RefC::adopt(heap::ref_copy(self.va()?)?))
    }

    /// 借用目标的可变包装；不计数，引用单元释放后视图失效
    pub fn borrow_target(&self) -> Result<Borrowed<'_, T>> {
        let target = cell_target(self.va()?, T::TYPE_NAME)?;
        Ok(Borrowed {
            view: T::contained_in(target, Arc::clone(self.core())),
            _cell: PhantomData,
        })
    }
}

impl<T: RefTarget> RefC<T> {
    pub fn to_ref_c(&self) -> Result<RefC<T>> {
        self.duplicate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::wrapper::native_wrapper;

    struct Counted;
    heap::native_object!(Counted, "Counted");

    native_wrapper!(CountedWrapper, "Counted", release_target);
    impl RefTarget for CountedWrapper {}

    fn new_target() -> (u64, CountedWrapper) {
        let va = heap::alloc_target(Counted);
        let wrapper = fresh_target::<CountedWrapper>(va).unwrap();
        (va, wrapper)
    }

    #[test]
    fn test_ref_counts_follow_cells() {
        let (va, target) = new_target();
        assert_eq!(target.ref_count().unwrap(), 1);

        let first = target.to_ref().unwrap();
        assert_eq!(first.target_ref_count().unwrap(), 2);
        let second = first.duplicate().unwrap();
        assert_eq!(target.ref_count().unwrap(), 3);

        first.close().unwrap();
        assert_eq!(target.ref_count().unwrap(), 2);
        drop(target);
        assert_eq!(second.target_ref_count().unwrap(), 1);
        assert!(heap::is_live(va));

        drop(second);
        assert!(!heap::is_live(va));
    }

    #[test]
    fn test_empty_ref() {
        let empty = Ref::<CountedWrapper>::empty().unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.target_va().unwrap(), 0);
        assert_eq!(
            empty.borrow_target().err(),
            Some(BridgeError::InvalidHandle { kind: "Counted" })
        );
        assert!(empty.view_va().is_err());
    }

    #[test]
    fn test_borrowed_target_does_not_count() {
        let (va, target) = new_target();
        let cell = target.to_ref().unwrap();
        drop(target);
        {
            let view = cell.borrow_target().unwrap();
            assert_eq!(view.va().unwrap(), va);
            assert!(!view.owns_native_object());
            assert_eq!(cell.target_ref_count().unwrap(), 1);
        }
        cell.close().unwrap();
        assert!(!heap::is_live(va));
    }

    #[test]
    fn test_embedded_target_survives_zero_count() {
        let (va, target) = new_target();
        target.set_embedded().unwrap();
        let cell = target.to_ref_c().unwrap();
        drop(target);
        drop(cell);
        assert!(heap::is_live(va));
        assert_eq!(heap::ref_count(va).unwrap(), 0);
        heap::free(va).unwrap();
    }
}
