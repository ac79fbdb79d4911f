//! 形状与形状设置（原生侧）
//!
//! 设置对象描述形状参数，`create_result` 根据设置构建 Rapier `SharedShape`
//! 并包装为可计数的形状对象。构建结果缓存在设置上，直到参数被修改。

use glam::{Quat, Vec3};
use rapier3d::prelude::*;

use super::convert::{from_vector, to_pose, to_vector};
use super::heap::{self, native_object, NativeFault};
use super::material;

/// 默认凸半径
pub const DEFAULT_CONVEX_RADIUS: f32 = 0.05;
/// 默认密度 (kg/m^3)
pub const DEFAULT_DENSITY: f32 = 1000.0;
/// 默认凸包容差
pub const DEFAULT_HULL_TOLERANCE: f32 = 1.0e-3;

/// 形状子类型，数值与宿主侧枚举一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubType {
    Sphere = 0,
    Box = 1,
    Capsule = 3,
    Cylinder = 5,
    ConvexHull = 6,
    StaticCompound = 7,
}

impl SubType {
    pub fn is_convex(self) -> bool {
        !matches!(self, SubType::StaticCompound)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompoundChild {
    pub position: Vec3,
    pub rotation: Quat,
    pub shape: u64,
}

#[derive(Debug, Clone)]
pub enum SettingsKind {
    Box { half_extent: Vec3, convex_radius: f32 },
    Sphere { radius: f32 },
    Capsule { half_height: f32, radius: f32 },
    Cylinder { half_height: f32, radius: f32, convex_radius: f32 },
    ConvexHull { points: Vec<Vec3>, max_convex_radius: f32, hull_tolerance: f32 },
    StaticCompound { children: Vec<CompoundChild> },
}

impl SettingsKind {
    pub fn sub_type(&self) -> SubType {
        match self {
            SettingsKind::Box { .. } => SubType::Box,
            SettingsKind::Sphere { .. } => SubType::Sphere,
            SettingsKind::Capsule { .. } => SubType::Capsule,
            SettingsKind::Cylinder { .. } => SubType::Cylinder,
            SettingsKind::ConvexHull { .. } => SubType::ConvexHull,
            SettingsKind::StaticCompound { .. } => SubType::StaticCompound,
        }
    }
}

pub struct NativeShapeSettings {
    pub kind: SettingsKind,
    pub density: f32,
    /// 0 表示使用默认材质
    pub material: u64,
    pub user_data: u64,
    /// 缓存的构建结果（持有一次计数）
    pub cached_shape: u64,
}

native_object!(NativeShapeSettings, "ShapeSettings", {
    fn held_refs(&self) -> Vec<u64> {
        let mut held = vec![self.material, self.cached_shape];
        if let SettingsKind::StaticCompound { children } = &self.kind {
            held.extend(children.iter().map(|c| c.shape));
        }
        held
    }
});

impl NativeShapeSettings {
    /// 参数被修改后丢弃缓存，返回需要归还计数的旧形状
    fn invalidate(&mut self) -> u64 {
        std::mem::take(&mut self.cached_shape)
    }
}

pub struct NativeShape {
    pub sub_type: SubType,
    pub shared: SharedShape,
    pub density: f32,
    pub material: u64,
    pub user_data: u64,
    pub inner_radius: f32,
    pub convex_radius: f32,
    pub children: Vec<u64>,
}

native_object!(NativeShape, "Shape", {
    fn held_refs(&self) -> Vec<u64> {
        let mut held = vec![self.material];
        held.extend(self.children.iter().copied());
        held
    }
});

/// 形状构建结果
pub struct NativeShapeResult {
    /// 成功时持有一次计数
    pub shape: u64,
    pub error: String,
}

native_object!(NativeShapeResult, "ShapeResult", {
    fn held_refs(&self) -> Vec<u64> {
        vec![self.shape]
    }
});

// ============================================================================
// 设置
// ============================================================================

pub fn create_settings(kind: SettingsKind) -> u64 {
    heap::alloc_target(NativeShapeSettings {
        kind,
        density: DEFAULT_DENSITY,
        material: 0,
        user_data: 0,
        cached_shape: 0,
    })
}

/// 读取设置
pub fn with_settings<R>(
    settings_va: u64,
    f: impl FnOnce(&NativeShapeSettings) -> R,
) -> Result<R, NativeFault> {
    heap::with::<NativeShapeSettings, _>(settings_va, f)
}

/// 修改设置参数；缓存的形状随之失效
pub fn edit_settings<R>(
    settings_va: u64,
    f: impl FnOnce(&mut NativeShapeSettings) -> R,
) -> Result<R, NativeFault> {
    let (result, stale) = heap::with_mut::<NativeShapeSettings, _>(settings_va, |s| {
        let stale = s.invalidate();
        (f(s), stale)
    })?;
    if stale != 0 {
        heap::release_ref(stale)?;
    }
    Ok(result)
}

/// 修改设置上的材质（持有新材质一次计数）
pub fn set_material(settings_va: u64, material_va: u64) -> Result<(), NativeFault> {
    if material_va != 0 {
        heap::add_ref(material_va)?;
    }
    let previous = edit_settings(settings_va, |s| std::mem::replace(&mut s.material, material_va))?;
    if previous != 0 {
        heap::release_ref(previous)?;
    }
    Ok(())
}

/// 向静态复合形状设置添加子形状（持有子形状一次计数）
pub fn add_compound_child(
    settings_va: u64,
    position: Vec3,
    rotation: Quat,
    shape_va: u64,
) -> Result<bool, NativeFault> {
    heap::with::<NativeShape, _>(shape_va, |_| ())?;
    heap::add_ref(shape_va)?;
    let added = edit_settings(settings_va, |s| match &mut s.kind {
        SettingsKind::StaticCompound { children } => {
            children.push(CompoundChild { position, rotation, shape: shape_va });
            true
        }
        _ => false,
    })?;
    if !added {
        heap::release_ref(shape_va)?;
    }
    Ok(added)
}

// ============================================================================
// 构建
// ============================================================================

struct Built {
    shared: SharedShape,
    inner_radius: f32,
    convex_radius: f32,
}

fn build(kind: &SettingsKind) -> Result<(Built, Vec<u64>), String> {
    match kind {
        SettingsKind::Box { half_extent, convex_radius } => {
            let min_half = half_extent.min_element();
            if *convex_radius < 0.0 || *convex_radius > min_half {
                return Err(format!("Invalid convex radius {}", convex_radius));
            }
            let inner = *half_extent - Vec3::splat(*convex_radius);
            let shared = if *convex_radius > 0.0 {
                SharedShape::round_cuboid(inner.x, inner.y, inner.z, *convex_radius)
            } else {
                SharedShape::cuboid(half_extent.x, half_extent.y, half_extent.z)
            };
            Ok((Built { shared, inner_radius: min_half, convex_radius: *convex_radius }, Vec::new()))
        }
        SettingsKind::Sphere { radius } => {
            if *radius <= 0.0 {
                return Err(format!("Invalid radius {}", radius));
            }
            Ok((
                Built { shared: SharedShape::ball(*radius), inner_radius: *radius, convex_radius: *radius },
                Vec::new(),
            ))
        }
        SettingsKind::Capsule { half_height, radius } => {
            if *radius <= 0.0 || *half_height <= 0.0 {
                return Err(format!("Invalid capsule size ({}, {})", half_height, radius));
            }
            Ok((
                Built {
                    shared: SharedShape::capsule_y(*half_height, *radius),
                    inner_radius: *radius,
                    convex_radius: *radius,
                },
                Vec::new(),
            ))
        }
        SettingsKind::Cylinder { half_height, radius, convex_radius } => {
            if *convex_radius < 0.0 || *half_height < *convex_radius || *radius < *convex_radius {
                return Err(format!("Invalid convex radius {}", convex_radius));
            }
            let shared = if *convex_radius > 0.0 {
                SharedShape::round_cylinder(
                    *half_height - *convex_radius,
                    *radius - *convex_radius,
                    *convex_radius,
                )
            } else {
                SharedShape::cylinder(*half_height, *radius)
            };
            Ok((
                Built { shared, inner_radius: half_height.min(*radius), convex_radius: *convex_radius },
                Vec::new(),
            ))
        }
        SettingsKind::ConvexHull { points, max_convex_radius, .. } => {
            if points.len() < 4 {
                return Err(format!("Too few points for convex hull ({})", points.len()));
            }
            let vertices: Vec<Vector> = points.iter().map(|p| to_vector(*p)).collect();
            let shared = SharedShape::convex_hull(&vertices)
                .ok_or_else(|| "Failed to create convex hull".to_owned())?;
            let aabb = shared.compute_local_aabb();
            let half = (from_vector(&aabb.maxs) - from_vector(&aabb.mins)) * 0.5;
            Ok((
                Built { shared, inner_radius: half.min_element(), convex_radius: *max_convex_radius },
                Vec::new(),
            ))
        }
        SettingsKind::StaticCompound { children } => {
            if children.is_empty() {
                return Err("Compound needs at least 1 sub shape".to_owned());
            }
            let mut parts = Vec::with_capacity(children.len());
            for child in children {
                let shared = heap::with::<NativeShape, _>(child.shape, |s| s.shared.clone())
                    .map_err(|fault| format!("Invalid sub shape: {}", fault))?;
                parts.push((to_pose(child.position.as_dvec3(), child.rotation), shared));
            }
            let child_vas = children.iter().map(|c| c.shape).collect();
            Ok((
                Built { shared: SharedShape::compound(parts), inner_radius: 0.0, convex_radius: 0.0 },
                child_vas,
            ))
        }
    }
}

/// 根据设置构建形状，返回新的 ShapeResult 对象地址
pub fn create_result(settings_va: u64) -> Result<u64, NativeFault> {
    let (kind, density, material_va, user_data, cached) = with_settings(settings_va, |s| {
        (s.kind.clone(), s.density, s.material, s.user_data, s.cached_shape)
    })?;

    if cached != 0 && heap::is_live(cached) {
        heap::add_ref(cached)?;
        return Ok(heap::alloc(NativeShapeResult { shape: cached, error: String::new() }));
    }

    let (built, children) = match build(&kind) {
        Ok(built) => built,
        Err(error) => {
            log::debug!("[形状] {:#x} 构建失败: {}", settings_va, error);
            return Ok(heap::alloc(NativeShapeResult { shape: 0, error }));
        }
    };

    let material_va = if material_va == 0 {
        material::default_material()
    } else {
        heap::add_ref(material_va)?;
        material_va
    };
    for &child in &children {
        heap::add_ref(child)?;
    }
    let shape_va = heap::alloc_target(NativeShape {
        sub_type: kind.sub_type(),
        shared: built.shared,
        density,
        material: material_va,
        user_data,
        inner_radius: built.inner_radius,
        convex_radius: built.convex_radius,
        children,
    });

    // 一次计数给结果，一次给设置上的缓存
    heap::add_ref(shape_va)?;
    heap::add_ref(shape_va)?;
    let displaced = heap::with_mut::<NativeShapeSettings, _>(settings_va, |s| {
        std::mem::replace(&mut s.cached_shape, shape_va)
    })?;
    if displaced != 0 {
        heap::release_ref(displaced)?;
    }
    Ok(heap::alloc(NativeShapeResult { shape: shape_va, error: String::new() }))
}

pub fn result_shape(result_va: u64) -> Result<u64, NativeFault> {
    heap::with::<NativeShapeResult, _>(result_va, |r| r.shape)
}

pub fn result_error(result_va: u64) -> Result<String, NativeFault> {
    heap::with::<NativeShapeResult, _>(result_va, |r| r.error.clone())
}

// ============================================================================
// 形状查询
// ============================================================================

pub fn with_shape<R>(shape_va: u64, f: impl FnOnce(&NativeShape) -> R) -> Result<R, NativeFault> {
    heap::with::<NativeShape, _>(shape_va, f)
}

pub fn with_shape_mut<R>(
    shape_va: u64,
    f: impl FnOnce(&mut NativeShape) -> R,
) -> Result<R, NativeFault> {
    heap::with_mut::<NativeShape, _>(shape_va, f)
}

/// 局部包围盒 (min, max)
pub fn local_bounds(shape_va: u64) -> Result<(Vec3, Vec3), NativeFault> {
    with_shape(shape_va, |s| {
        let aabb = s.shared.compute_local_aabb();
        (from_vector(&aabb.mins), from_vector(&aabb.maxs))
    })
}

/// 质心（局部坐标）
pub fn center_of_mass(shape_va: u64) -> Result<Vec3, NativeFault> {
    with_shape(shape_va, |s| {
        let props = s.shared.mass_properties(1.0);
        let com = &props.local_com;
        Vec3::new(com.x, com.y, com.z)
    })
}

/// 体积（单位密度下的质量）
pub fn volume(shape_va: u64) -> Result<f32, NativeFault> {
    with_shape(shape_va, |s| s.shared.mass_properties(1.0).mass())
}

/// 按形状自身密度计算的质量
pub fn mass(shape_va: u64) -> Result<f32, NativeFault> {
    with_shape(shape_va, |s| s.shared.mass_properties(s.density).mass())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release_result(result: u64) {
        heap::free(result).unwrap();
    }

    #[test]
    fn test_box_shape_volume_and_bounds() {
        let settings = create_settings(SettingsKind::Box {
            half_extent: Vec3::new(1.0, 2.0, 3.0),
            convex_radius: 0.0,
        });
        heap::add_ref(settings).unwrap();
        let result = create_result(settings).unwrap();
        let shape = result_shape(result).unwrap();
        assert_ne!(shape, 0);

        let (min, max) = local_bounds(shape).unwrap();
        assert!((max - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-4);
        assert!((min + Vec3::new(1.0, 2.0, 3.0)).length() < 1e-4);
        assert!((volume(shape).unwrap() - 48.0).abs() < 1e-2);

        release_result(result);
        heap::release_ref(settings).unwrap();
        assert!(!heap::is_live(shape));
    }

    #[test]
    fn test_invalid_convex_radius_is_an_error_result() {
        let settings = create_settings(SettingsKind::Box {
            half_extent: Vec3::splat(0.1),
            convex_radius: 0.5,
        });
        heap::add_ref(settings).unwrap();
        let result = create_result(settings).unwrap();
        assert_eq!(result_shape(result).unwrap(), 0);
        assert!(result_error(result).unwrap().contains("convex radius"));
        release_result(result);
        heap::release_ref(settings).unwrap();
    }

    #[test]
    fn test_created_shape_is_cached_until_edit() {
        let settings = create_settings(SettingsKind::Sphere { radius: 1.0 });
        heap::add_ref(settings).unwrap();
        let first = create_result(settings).unwrap();
        let second = create_result(settings).unwrap();
        let shape = result_shape(first).unwrap();
        assert_eq!(shape, result_shape(second).unwrap());
        // 两个结果 + 设置缓存
        assert_eq!(heap::ref_count(shape).unwrap(), 3);

        edit_settings(settings, |s| s.kind = SettingsKind::Sphere { radius: 2.0 }).unwrap();
        assert_eq!(heap::ref_count(shape).unwrap(), 2);
        let third = create_result(settings).unwrap();
        assert_ne!(result_shape(third).unwrap(), shape);

        for result in [first, second, third] {
            release_result(result);
        }
        heap::release_ref(settings).unwrap();
        assert!(!heap::is_live(shape));
    }

    #[test]
    fn test_compound_holds_children() {
        let child_settings = create_settings(SettingsKind::Sphere { radius: 0.5 });
        heap::add_ref(child_settings).unwrap();
        let child_result = create_result(child_settings).unwrap();
        let child = result_shape(child_result).unwrap();

        let compound = create_settings(SettingsKind::StaticCompound { children: Vec::new() });
        heap::add_ref(compound).unwrap();
        assert!(add_compound_child(compound, Vec3::X, Quat::IDENTITY, child).unwrap());
        let compound_result = create_result(compound).unwrap();
        let compound_shape = result_shape(compound_result).unwrap();
        assert_eq!(with_shape(compound_shape, |s| s.sub_type).unwrap(), SubType::StaticCompound);

        release_result(child_result);
        heap::release_ref(child_settings).unwrap();
        assert!(heap::is_live(child));

        release_result(compound_result);
        heap::release_ref(compound).unwrap();
        assert!(!heap::is_live(compound_shape));
        assert!(!heap::is_live(child));
    }
}
