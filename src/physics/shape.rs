//! 形状与形状设置
//!
//! 设置对象是可计数的；`create()` 的结果缓存在设置上，修改任何参数后缓存失效。
//! `into_shape()` 消耗设置：之后这个设置包装的所有克隆都变为空。

use glam::{Quat, Vec3};

use crate::lifetime::counted::{fresh_target, release_target};
use crate::lifetime::wrapper::{free_object, native_wrapper};
use crate::lifetime::{NativeWrapper, Ref, RefC, RefTarget};
use crate::native::heap;
use crate::native::shape::{self, SettingsKind, DEFAULT_CONVEX_RADIUS, DEFAULT_HULL_TOLERANCE};
use crate::readonly::{ConstPhysicsMaterial, ConstShape, ConstShapeSettings, NativeView};
use crate::{check_finite, check_quat, check_vec3, BridgeError, Result};

use super::material::PhysicsMaterial;

// ============================================================================
// 形状
// ============================================================================

native_wrapper!(
    /// 不可变的碰撞形状（可计数）
    Shape,
    "Shape",
    release_target
);

impl RefTarget for Shape {}
impl ConstShape for Shape {}

pub type ShapeRef = Ref<Shape>;
pub type ShapeRefC = RefC<Shape>;

impl Shape {
    pub(crate) fn share(va: u64) -> Result<Self> {
        fresh_target(va)
    }

    pub fn set_user_data(&self, user_data: u64) -> Result<()> {
        shape::with_shape_mut(self.va()?, |s| s.user_data = user_data)?;
        Ok(())
    }

    /// 形状使用的材质
    pub fn material(&self) -> Result<Option<PhysicsMaterial>> {
        let material_va = shape::with_shape(self.va()?, |s| s.material)?;
        if material_va == 0 {
            return Ok(None);
        }
        PhysicsMaterial::share(material_va).map(Some)
    }
}

native_wrapper!(
    /// 形状构建结果
    ShapeResult,
    "ShapeResult",
    free_object
);

impl ShapeResult {
    pub fn is_valid(&self) -> Result<bool> {
        Ok(shape::result_shape(self.va()?)? != 0)
    }

    pub fn has_error(&self) -> Result<bool> {
        Ok(!shape::result_error(self.va()?)?.is_empty())
    }

    pub fn error(&self) -> Result<String> {
        Ok(shape::result_error(self.va()?)?)
    }

    /// 指向结果形状的新引用；构建失败时为 None
    pub fn get(&self) -> Result<Option<ShapeRef>> {
        let shape_va = shape::result_shape(self.va()?)?;
        if shape_va == 0 {
            return Ok(None);
        }
        Ok(Some(ShapeRef::adopt(heap::ref_new(shape_va)?)))
    }

    /// 结果形状的包装，持有一次计数
    pub fn shape(&self) -> Result<Option<Shape>> {
        let shape_va = shape::result_shape(self.va()?)?;
        if shape_va == 0 {
            return Ok(None);
        }
        Shape::share(shape_va).map(Some)
    }
}

// ============================================================================
// 设置的公共部分
// ============================================================================

fn kind_mismatch<T: NativeWrapper>() -> BridgeError {
    BridgeError::InvalidArgument(format!("native object is not a {}", T::TYPE_NAME))
}

fn read_kind<T: NativeWrapper, R>(settings: &T, f: impl FnOnce(&SettingsKind) -> Option<R>) -> Result<R> {
    shape::with_settings(settings.va()?, |s| f(&s.kind))?.ok_or_else(kind_mismatch::<T>)
}

fn edit_kind<T: NativeWrapper>(settings: &T, f: impl FnOnce(&mut SettingsKind) -> bool) -> Result<()> {
    if shape::edit_settings(settings.va()?, |s| f(&mut s.kind))? {
        Ok(())
    } else {
        Err(kind_mismatch::<T>())
    }
}

/// 各种形状设置共有的操作
pub trait ShapeSettings: RefTarget + ConstShapeSettings {
    fn set_density(&self, density: f32) -> Result<()> {
        check_finite("density", &[density as f64])?;
        if density <= 0.0 {
            return Err(BridgeError::InvalidArgument(format!("density must be positive, got {}", density)));
        }
        shape::edit_settings(self.va()?, |s| s.density = density)?;
        Ok(())
    }

    /// 设置持有材质的一次计数，不需要保活
    fn set_material(&self, material: &impl ConstPhysicsMaterial) -> Result<()> {
        Ok(shape::set_material(self.va()?, material.view_va()?)?)
    }

    /// 恢复为默认材质
    fn clear_material(&self) -> Result<()> {
        Ok(shape::set_material(self.va()?, 0)?)
    }

    fn set_user_data(&self, user_data: u64) -> Result<()> {
        shape::edit_settings(self.va()?, |s| s.user_data = user_data)?;
        Ok(())
    }

    /// 构建形状；参数未变时返回同一个形状
    fn create(&self) -> Result<ShapeResult> {
        Ok(ShapeResult::adopt(shape::create_result(self.va()?)?))
    }

    /// 构建形状并消耗设置；构建失败时为 None，设置同样被消耗
    fn into_shape(self) -> Result<Option<Shape>> {
        if !self.owns_native_object() {
            return Err(BridgeError::OwnershipViolation(format!(
                "{} @ {} cannot be consumed by a non-owning wrapper",
                Self::TYPE_NAME,
                self.handle()
            )));
        }
        let result = self.create()?;
        if let Some(error) = result.has_error()?.then(|| result.error()).transpose()? {
            log::warn!("[形状] {} 构建失败: {}", Self::TYPE_NAME, error);
        }
        let shape = result.shape()?;
        self.close()?;
        Ok(shape)
    }
}

pub type ShapeSettingsRef<T> = Ref<T>;

macro_rules! shape_settings {
    ($(#[$meta:meta])* $name:ident) => {
        native_wrapper!($(#[$meta])* $name, "ShapeSettings", release_target);

        impl RefTarget for $name {}
        impl ConstShapeSettings for $name {}
        impl ShapeSettings for $name {}
    };
}

// ============================================================================
// 具体设置
// ============================================================================

shape_settings!(
    /// 长方体
    BoxShapeSettings
);

impl BoxShapeSettings {
    pub fn new(half_extent: Vec3) -> Result<Self> {
        Self::with_convex_radius(half_extent, DEFAULT_CONVEX_RADIUS)
    }

    pub fn with_convex_radius(half_extent: Vec3, convex_radius: f32) -> Result<Self> {
        check_vec3("half extent", half_extent)?;
        check_finite("convex radius", &[convex_radius as f64])?;
        fresh_target(shape::create_settings(SettingsKind::Box { half_extent, convex_radius }))
    }

    pub fn half_extent(&self) -> Result<Vec3> {
        read_kind(self, |k| match k {
            SettingsKind::Box { half_extent, .. } => Some(*half_extent),
            _ => None,
        })
    }

    pub fn set_half_extent(&self, value: Vec3) -> Result<()> {
        check_vec3("half extent", value)?;
        edit_kind(self, |k| match k {
            SettingsKind::Box { half_extent, .. } => {
                *half_extent = value;
                true
            }
            _ => false,
        })
    }

    pub fn convex_radius(&self) -> Result<f32> {
        read_kind(self, |k| match k {
            SettingsKind::Box { convex_radius, .. } => Some(*convex_radius),
            _ => None,
        })
    }

    pub fn set_convex_radius(&self, value: f32) -> Result<()> {
        check_finite("convex radius", &[value as f64])?;
        edit_kind(self, |k| match k {
            SettingsKind::Box { convex_radius, .. } => {
                *convex_radius = value;
                true
            }
            _ => false,
        })
    }
}

shape_settings!(
    /// 球体
    SphereShapeSettings
);

impl SphereShapeSettings {
    pub fn new(radius: f32) -> Result<Self> {
        check_finite("radius", &[radius as f64])?;
        fresh_target(shape::create_settings(SettingsKind::Sphere { radius }))
    }

    pub fn radius(&self) -> Result<f32> {
        read_kind(self, |k| match k {
            SettingsKind::Sphere { radius } => Some(*radius),
            _ => None,
        })
    }

    pub fn set_radius(&self, value: f32) -> Result<()> {
        check_finite("radius", &[value as f64])?;
        edit_kind(self, |k| match k {
            SettingsKind::Sphere { radius } => {
                *radius = value;
                true
            }
            _ => false,
        })
    }
}

shape_settings!(
    /// 胶囊体，沿 Y 轴
    CapsuleShapeSettings
);

impl CapsuleShapeSettings {
    pub fn new(half_height_of_cylinder: f32, radius: f32) -> Result<Self> {
        check_finite("capsule size", &[half_height_of_cylinder as f64, radius as f64])?;
        fresh_target(shape::create_settings(SettingsKind::Capsule {
            half_height: half_height_of_cylinder,
            radius,
        }))
    }

    pub fn half_height_of_cylinder(&self) -> Result<f32> {
        read_kind(self, |k| match k {
            SettingsKind::Capsule { half_height, .. } => Some(*half_height),
            _ => None,
        })
    }

    pub fn radius(&self) -> Result<f32> {
        read_kind(self, |k| match k {
            SettingsKind::Capsule { radius, .. } => Some(*radius),
            _ => None,
        })
    }

    pub fn set_half_height_of_cylinder(&self, value: f32) -> Result<()> {
        check_finite("half height", &[value as f64])?;
        edit_kind(self, |k| match k {
            SettingsKind::Capsule { half_height, .. } => {
                *half_height = value;
                true
            }
            _ => false,
        })
    }

    pub fn set_radius(&self, value: f32) -> Result<()> {
        check_finite("radius", &[value as f64])?;
        edit_kind(self, |k| match k {
            SettingsKind::Capsule { radius, .. } => {
                *radius = value;
                true
            }
            _ => false,
        })
    }
}

shape_settings!(
    /// 圆柱体，沿 Y 轴
    CylinderShapeSettings
);

impl CylinderShapeSettings {
    pub fn new(half_height: f32, radius: f32) -> Result<Self> {
        Self::with_convex_radius(half_height, radius, DEFAULT_CONVEX_RADIUS)
    }

    pub fn with_convex_radius(half_height: f32, radius: f32, convex_radius: f32) -> Result<Self> {
        check_finite(
            "cylinder size",
            &[half_height as f64, radius as f64, convex_radius as f64],
        )?;
        fresh_target(shape::create_settings(SettingsKind::Cylinder {
            half_height,
            radius,
            convex_radius,
        }))
    }

    pub fn half_height(&self) -> Result<f32> {
        read_kind(self, |k| match k {
            SettingsKind::Cylinder { half_height, .. } => Some(*half_height),
            _ => None,
        })
    }

    pub fn radius(&self) -> Result<f32> {
        read_kind(self, |k| match k {
            SettingsKind::Cylinder { radius, .. } => Some(*radius),
            _ => None,
        })
    }

    pub fn convex_radius(&self) -> Result<f32> {
        read_kind(self, |k| match k {
            SettingsKind::Cylinder { convex_radius, .. } => Some(*convex_radius),
            _ => None,
        })
    }

    pub fn set_convex_radius(&self, value: f32) -> Result<()> {
        check_finite("convex radius", &[value as f64])?;
        edit_kind(self, |k| match k {
            SettingsKind::Cylinder { convex_radius, .. } => {
                *convex_radius = value;
                true
            }
            _ => false,
        })
    }
}

shape_settings!(
    /// 点集的凸包
    ConvexHullShapeSettings
);

impl ConvexHullShapeSettings {
    pub fn new(points: &[Vec3]) -> Result<Self> {
        for point in points {
            check_vec3("hull point", *point)?;
        }
        fresh_target(shape::create_settings(SettingsKind::ConvexHull {
            points: points.to_vec(),
            max_convex_radius: DEFAULT_CONVEX_RADIUS,
            hull_tolerance: DEFAULT_HULL_TOLERANCE,
        }))
    }

    pub fn points(&self) -> Result<Vec<Vec3>> {
        read_kind(self, |k| match k {
            SettingsKind::ConvexHull { points, .. } => Some(points.clone()),
            _ => None,
        })
    }

    pub fn max_convex_radius(&self) -> Result<f32> {
        read_kind(self, |k| match k {
            SettingsKind::ConvexHull { max_convex_radius, .. } => Some(*max_convex_radius),
            _ => None,
        })
    }

    pub fn set_max_convex_radius(&self, value: f32) -> Result<()> {
        check_finite("max convex radius", &[value as f64])?;
        edit_kind(self, |k| match k {
            SettingsKind::ConvexHull { max_convex_radius, .. } => {
                *max_convex_radius = value;
                true
            }
            _ => false,
        })
    }

    pub fn hull_tolerance(&self) -> Result<f32> {
        read_kind(self, |k| match k {
            SettingsKind::ConvexHull { hull_tolerance, .. } => Some(*hull_tolerance),
            _ => None,
        })
    }

    pub fn set_hull_tolerance(&self, value: f32) -> Result<()> {
        check_finite("hull tolerance", &[value as f64])?;
        edit_kind(self, |k| match k {
            SettingsKind::ConvexHull { hull_tolerance, .. } => {
                *hull_tolerance = value;
                true
            }
            _ => false,
        })
    }
}

shape_settings!(
    /// 由若干子形状组成、创建后不再变化的复合形状
    StaticCompoundShapeSettings
);

impl StaticCompoundShapeSettings {
    pub fn new() -> Result<Self> {
        fresh_target(shape::create_settings(SettingsKind::StaticCompound { children: Vec::new() }))
    }

    /// 添加子形状；设置持有子形状一次计数
    pub fn add_shape(&self, position: Vec3, rotation: Quat, child: &impl ConstShape) -> Result<()> {
        check_vec3("position", position)?;
        check_quat("rotation", rotation)?;
        if shape::add_compound_child(self.va()?, position, rotation, child.view_va()?)? {
            Ok(())
        } else {
            Err(kind_mismatch::<Self>())
        }
    }

    pub fn num_sub_shapes(&self) -> Result<usize> {
        read_kind(self, |k| match k {
            SettingsKind::StaticCompound { children } => Some(children.len()),
            _ => None,
        })
    }
}
