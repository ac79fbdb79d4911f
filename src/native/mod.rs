//! 原生侧
//!
//! 按地址寻址的对象堆，以及驱动 Rapier 的粘合代码。
//! 宿主侧只通过这里的函数传递地址和基本类型。

pub mod heap;
pub mod convert;
pub mod material;
pub mod shape;
pub mod filter;
pub mod body;
pub mod lock;
pub mod listener;
pub mod job;
pub mod constraint;
pub mod system;
pub mod ragdoll;
pub mod query;

pub use heap::NativeFault;
