//! 类型化的物理包装
//!
//! 原生侧由 Rapier3D 驱动，这里的包装只负责所有权、保活与参数检查。
//!
//! ## 对应关系
//! | 包装 | 原生对象 | 释放方式 |
//! |------|----------|----------|
//! | PhysicsMaterial | 材质 | 计数 |
//! | *ShapeSettings | 形状设置（缓存构建结果） | 计数 |
//! | Shape | SharedShape + 质量属性 | 计数 |
//! | BodyCreationSettings | 刚体参数 | 直接释放 |
//! | Body | 刚体代理 → 系统中的 RigidBody + Collider | 未加入系统时销毁 |
//! | GroupFilterTable | 子组碰撞表（PhysicsHooks 读取） | 计数 |
//! | *FilterTable / BroadPhaseLayerInterfaceTable | 层表（InteractionGroups） | 直接释放 |
//! | *ConstraintSettings / Constraint | GenericJoint | 计数 |
//! | Skeleton / RagdollSettings / Ragdoll | 关节层级 / 部件 / 一组刚体与约束 | 计数 |
//! | PhysicsSystem | RigidBodySet + ColliderSet + PhysicsPipeline | 直接释放 |
//! | JobSystemThreadPool | rayon::ThreadPool | 直接释放 |
//! | ClosestHitCastRayCollector / RayCastResult | 最近命中 / 内嵌的命中结果 | 直接释放 / 随收集器 |

mod body;
mod constraint;
mod filter;
mod job;
mod listener;
mod material;
mod query;
mod ragdoll;
mod shape;
pub(crate) mod system;

pub use body::{Body, BodyCreationSettings, BodyId};
pub use constraint::{
    Constraint, ConstraintRef, ConstraintRefC, ConstraintSettingsRef, FixedConstraintSettings,
    PointConstraintSettings, TwoBodyConstraintSettings,
};
pub use filter::{
    BroadPhaseLayerInterfaceTable, CollisionGroup, GroupFilterTable, GroupFilterTableRef, ObjectLayerPairFilterTable,
    ObjectVsBroadPhaseLayerFilterTable,
};
pub use job::{JobSystemThreadPool, TempAllocatorImpl, MAX_PHYSICS_BARRIERS, MAX_PHYSICS_JOBS};
pub use listener::{ContactListener, ContactManifold, CustomContactListener};
pub use material::{PhysicsMaterial, PhysicsMaterialRef, PhysicsMaterialRefC};
pub use query::{ClosestHitCastRayCollector, RayCastResult};
pub use ragdoll::{Part, Ragdoll, RagdollRef, RagdollSettings, RagdollSettingsRef, Skeleton, SkeletonRef};
pub use shape::{
    BoxShapeSettings, CapsuleShapeSettings, ConvexHullShapeSettings, CylinderShapeSettings, Shape, ShapeRef,
    ShapeRefC, ShapeResult, ShapeSettings, ShapeSettingsRef, SphereShapeSettings, StaticCompoundShapeSettings,
};
pub use system::{BodyInterface, BodyLockInterface, BodyLockRead, BodyLockWrite, PhysicsSystem, PhysicsUpdateError};

pub use crate::readonly::{BodyState, EActivation, EMotionType};
