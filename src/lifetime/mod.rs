//! 宿主侧生命周期
//!
//! 句柄、所有权记录、对象包装、计数引用与别名保活。

pub mod handle;
pub mod ownership;
pub mod wrapper;
pub mod counted;
pub mod retention;

pub use counted::{Borrowed, Ref, RefC, RefTarget};
pub use handle::NativeHandle;
pub use ownership::OwnershipRecord;
pub use retention::Relation;
pub use wrapper::{sweep_leaks, HostHold, NativeWrapper, WrapperCore};
