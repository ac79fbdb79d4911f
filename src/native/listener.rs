//! 接触监听器（原生侧）
//!
//! 物理系统只保存监听器的裸地址；回调在步进结束、系统锁释放之后，
//! 在调用 `update` 的线程上依次派发。

use glam::Vec3;
use std::sync::Arc;

use super::body::BodyId;
use super::heap::{self, native_object, NativeFault};

/// 一对刚体之间的接触流形（世界坐标）
#[derive(Debug, Clone, PartialEq)]
pub struct ContactManifold {
    /// 从第一个刚体指向第二个刚体
    pub normal: Vec3,
    pub penetration_depth: f32,
    pub points: Vec<Vec3>,
}

/// 接触事件回调；实现者自行处理线程同步
pub trait ContactListener: Send + Sync {
    fn on_contact_added(&self, _body1: BodyId, _body2: BodyId, _manifold: &ContactManifold) {}

    fn on_contact_persisted(&self, _body1: BodyId, _body2: BodyId, _manifold: &ContactManifold) {}

    fn on_contact_removed(&self, _body1: BodyId, _body2: BodyId) {}
}

pub struct NativeContactListener {
    pub callbacks: Arc<dyn ContactListener>,
}

native_object!(NativeContactListener, "ContactListener");

pub fn create(callbacks: Arc<dyn ContactListener>) -> u64 {
    heap::alloc(NativeContactListener { callbacks })
}

pub fn callbacks(listener_va: u64) -> Result<Arc<dyn ContactListener>, NativeFault> {
    heap::with::<NativeContactListener, _>(listener_va, |l| Arc::clone(&l.callbacks))
}

/// 一次步进产生的接触事件
#[derive(Debug, Clone, PartialEq)]
pub enum ContactEvent {
    Added(BodyId, BodyId, ContactManifold),
    Persisted(BodyId, BodyId, ContactManifold),
    Removed(BodyId, BodyId),
}

/// 按顺序派发事件
pub fn dispatch(listener: &dyn ContactListener, events: &[ContactEvent]) {
    for event in events {
        match event {
            ContactEvent::Added(a, b, manifold) => listener.on_contact_added(*a, *b, manifold),
            ContactEvent::Persisted(a, b, manifold) => listener.on_contact_persisted(*a, *b, manifold),
            ContactEvent::Removed(a, b) => listener.on_contact_removed(*a, *b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    impl ContactListener for Recorder {
        fn on_contact_added(&self, _: BodyId, _: BodyId, _: &ContactManifold) {
            self.0.lock().unwrap().push("added");
        }

        fn on_contact_removed(&self, _: BodyId, _: BodyId) {
            self.0.lock().unwrap().push("removed");
        }
    }

    #[test]
    fn test_dispatch_preserves_order() {
        let recorder = Arc::new(Recorder::default());
        let va = create(recorder.clone());
        let manifold = ContactManifold {
            normal: Vec3::Y,
            penetration_depth: 0.0,
            points: Vec::new(),
        };
        let a = BodyId::new(0, 0);
        let b = BodyId::new(1, 0);
        let events = vec![
            ContactEvent::Added(a, b, manifold.clone()),
            ContactEvent::Persisted(a, b, manifold),
            ContactEvent::Removed(a, b),
        ];
        dispatch(callbacks(va).unwrap().as_ref(), &events);
        assert_eq!(*recorder.0.lock().unwrap(), vec!["added", "removed"]);
        heap::free(va).unwrap();
    }
}
