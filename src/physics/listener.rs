//! 接触监听器

use std::sync::Arc;

use crate::lifetime::wrapper::{free_object, native_wrapper};
use crate::lifetime::NativeWrapper;
use crate::native::listener;

pub use crate::native::listener::{ContactListener, ContactManifold};

native_wrapper!(
    /// 宿主实现的接触回调
    ///
    /// 物理系统只记住监听器地址，`PhysicsSystem::set_contact_listener` 会保活本包装。
    CustomContactListener,
    "ContactListener",
    free_object
);

impl CustomContactListener {
    pub fn new(callbacks: Arc<dyn ContactListener>) -> Self {
        Self::adopt(listener::create(callbacks))
    }

    pub fn callbacks(&self) -> crate::Result<Arc<dyn ContactListener>> {
        Ok(listener::callbacks(self.va()?)?)
    }
}
