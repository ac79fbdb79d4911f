//! 刚体创建设置与刚体 ID（原生侧）

use glam::{DVec3, Quat, Vec3};

use super::filter::CollisionGroupData;
use super::heap::{self, native_object, NativeFault};
use super::shape;

/// 刚体 ID：低 24 位为索引，高 8 位为序列号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(u32);

impl BodyId {
    pub const INVALID: BodyId = BodyId(0xffff_ffff);
    pub const MAX_INDEX: u32 = 0x00ff_ffff;

    pub fn new(index: u32, sequence: u8) -> Self {
        BodyId(((sequence as u32) << 24) | (index & Self::MAX_INDEX))
    }

    pub fn from_raw(raw: u32) -> Self {
        BodyId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn index(self) -> u32 {
        self.0 & Self::MAX_INDEX
    }

    pub fn sequence(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }
}

impl Default for BodyId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}:{}", self.index(), self.sequence())
    }
}

/// 运动类型，数值与宿主侧枚举一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionType {
    Static = 0,
    Kinematic = 1,
    Dynamic = 2,
}

impl MotionType {
    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        match ordinal {
            0 => Some(MotionType::Static),
            1 => Some(MotionType::Kinematic),
            2 => Some(MotionType::Dynamic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Activate = 0,
    DontActivate = 1,
}

/// 刚体在物理系统中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    Unregistered,
    RegisteredInactive,
    RegisteredActive,
}

/// 刚体创建参数
///
/// `shape` 与 `shape_settings` 各持有一次计数；两者都设置时优先使用 `shape`。
#[derive(Debug, Clone)]
pub struct BodySettingsData {
    pub position: DVec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub user_data: u64,
    pub object_layer: u32,
    pub collision_group: CollisionGroupData,
    pub motion_type: MotionType,
    pub allow_sleeping: bool,
    pub is_sensor: bool,
    pub friction: f32,
    pub restitution: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub gravity_factor: f32,
    pub shape: u64,
    pub shape_settings: u64,
}

impl Default for BodySettingsData {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            user_data: 0,
            object_layer: 0,
            collision_group: CollisionGroupData::default(),
            motion_type: MotionType::Dynamic,
            allow_sleeping: true,
            is_sensor: false,
            friction: 0.2,
            restitution: 0.0,
            linear_damping: 0.05,
            angular_damping: 0.05,
            gravity_factor: 1.0,
            shape: 0,
            shape_settings: 0,
        }
    }
}

impl BodySettingsData {
    pub fn held_refs(&self) -> Vec<u64> {
        vec![self.shape, self.shape_settings]
    }

    /// 解析出实际使用的形状，并为调用者加一次计数；失败时返回错误信息
    pub fn resolve_shape(&self) -> Result<u64, String> {
        if self.shape != 0 {
            heap::add_ref(self.shape).map_err(|fault| fault.to_string())?;
            return Ok(self.shape);
        }
        if self.shape_settings == 0 {
            return Err("no shape".to_owned());
        }
        let result = shape::create_result(self.shape_settings).map_err(|f| f.to_string())?;
        let resolved = shape::result_shape(result).and_then(|shape_va| {
            if shape_va == 0 {
                Ok(Err(shape::result_error(result)?))
            } else {
                heap::add_ref(shape_va)?;
                Ok(Ok(shape_va))
            }
        });
        let _ = heap::free(result);
        match resolved {
            Ok(inner) => inner,
            Err(fault) => Err(fault.to_string()),
        }
    }
}

pub struct NativeBodyCreationSettings {
    pub data: BodySettingsData,
}

native_object!(NativeBodyCreationSettings, "BodyCreationSettings", {
    fn held_refs(&self) -> Vec<u64> {
        self.data.held_refs()
    }
});

pub fn create_settings(data: BodySettingsData) -> Result<u64, NativeFault> {
    for target in data.held_refs().into_iter().filter(|&t| t != 0) {
        heap::add_ref(target)?;
    }
    Ok(heap::alloc(NativeBodyCreationSettings { data }))
}

pub fn settings_data(settings_va: u64) -> Result<BodySettingsData, NativeFault> {
    heap::with::<NativeBodyCreationSettings, _>(settings_va, |s| s.data.clone())
}

pub fn edit_settings<R>(
    settings_va: u64,
    f: impl FnOnce(&mut BodySettingsData) -> R,
) -> Result<R, NativeFault> {
    heap::with_mut::<NativeBodyCreationSettings, _>(settings_va, |s| f(&mut s.data))
}

/// 替换设置上的形状（计数随之转移）
pub fn set_settings_shape(settings_va: u64, shape_va: u64) -> Result<(), NativeFault> {
    if shape_va != 0 {
        heap::add_ref(shape_va)?;
    }
    let previous = edit_settings(settings_va, |d| std::mem::replace(&mut d.shape, shape_va))?;
    if previous != 0 {
        heap::release_ref(previous)?;
    }
    Ok(())
}

pub fn set_settings_shape_settings(settings_va: u64, shape_settings_va: u64) -> Result<(), NativeFault> {
    if shape_settings_va != 0 {
        heap::add_ref(shape_settings_va)?;
    }
    let previous =
        edit_settings(settings_va, |d| std::mem::replace(&mut d.shape_settings, shape_settings_va))?;
    if previous != 0 {
        heap::release_ref(previous)?;
    }
    Ok(())
}

/// 刚体代理：宿主侧 Body 句柄指向它，实际数据在物理系统中
pub struct NativeBody {
    pub system: u64,
    pub id: BodyId,
}

native_object!(NativeBody, "Body");

pub fn body_location(body_va: u64) -> Result<(u64, BodyId), NativeFault> {
    heap::with::<NativeBody, _>(body_va, |b| (b.system, b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::shape::SettingsKind;

    #[test]
    fn test_body_id_packing() {
        let id = BodyId::new(1234, 7);
        assert_eq!(id.index(), 1234);
        assert_eq!(id.sequence(), 7);
        assert!(!id.is_invalid());
        assert!(BodyId::default().is_invalid());
        assert_eq!(BodyId::from_raw(id.raw()), id);
    }

    #[test]
    fn test_settings_hold_shape() {
        let shape_settings = shape::create_settings(SettingsKind::Sphere { radius: 0.5 });
        heap::add_ref(shape_settings).unwrap();
        let data = BodySettingsData {
            shape_settings,
            ..Default::default()
        };
        let settings = create_settings(data).unwrap();
        assert_eq!(heap::ref_count(shape_settings).unwrap(), 2);

        let resolved = settings_data(settings).unwrap().resolve_shape().unwrap();
        assert!(heap::is_live(resolved));

        heap::free(settings).unwrap();
        heap::release_ref(shape_settings).unwrap();
        assert!(!heap::is_live(shape_settings));
        // 解析时多加的一次计数仍由调用者持有
        assert_eq!(heap::ref_count(resolved).unwrap(), 1);
        heap::release_ref(resolved).unwrap();
    }

    #[test]
    fn test_missing_shape_is_reported() {
        let data = BodySettingsData::default();
        assert!(data.resolve_shape().is_err());
    }
}
