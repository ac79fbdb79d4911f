//! 射线查询收集器（原生侧）
//!
//! 收集器内嵌一个命中结果对象，随收集器一起释放。多次投射时只保留最近的命中。

use glam::{DVec3, Vec3};

use super::body::BodyId;
use super::heap::{self, native_object, NativeFault};
use super::system;

/// 未命中时的比例，略大于 1
pub const NO_HIT_FRACTION: f32 = 1.0 + f32::EPSILON;

pub struct NativeRayCastResult {
    pub body_id: BodyId,
    pub fraction: f32,
}

native_object!(NativeRayCastResult, "RayCastResult");

impl Default for NativeRayCastResult {
    fn default() -> Self {
        Self {
            body_id: BodyId::INVALID,
            fraction: NO_HIT_FRACTION,
        }
    }
}

pub struct NativeClosestHitCollector {
    /// 内嵌的命中结果
    pub hit: u64,
    pub had_hit: bool,
}

native_object!(NativeClosestHitCollector, "ClosestHitCastRayCollector", {
    fn embedded_children(&self) -> Vec<u64> {
        vec![self.hit]
    }
});

pub fn create_closest_hit_collector() -> u64 {
    let hit = heap::alloc(NativeRayCastResult::default());
    heap::alloc(NativeClosestHitCollector { hit, had_hit: false })
}

fn with_collector<R>(
    collector_va: u64,
    f: impl FnOnce(&NativeClosestHitCollector) -> R,
) -> Result<R, NativeFault> {
    heap::with::<NativeClosestHitCollector, _>(collector_va, f)
}

/// 命中结果的地址，只在收集器存活期间有效
pub fn hit(collector_va: u64) -> Result<u64, NativeFault> {
    with_collector(collector_va, |c| c.hit)
}

pub fn had_hit(collector_va: u64) -> Result<bool, NativeFault> {
    with_collector(collector_va, |c| c.had_hit)
}

/// 清除命中，收集器可以重新使用
pub fn reset(collector_va: u64) -> Result<(), NativeFault> {
    let hit_va = heap::with_mut::<NativeClosestHitCollector, _>(collector_va, |c| {
        c.had_hit = false;
        c.hit
    })?;
    heap::with_mut::<NativeRayCastResult, _>(hit_va, |r| *r = NativeRayCastResult::default())
}

pub fn result(result_va: u64) -> Result<(BodyId, f32), NativeFault> {
    heap::with::<NativeRayCastResult, _>(result_va, |r| (r.body_id, r.fraction))
}

/// 在物理系统中投射射线，比已有命中更近时更新收集器；返回这次投射是否命中
pub fn cast_ray(system_va: u64, origin: DVec3, direction: Vec3, collector_va: u64) -> Result<bool, NativeFault> {
    let hit_va = hit(collector_va)?;
    let Some((body_id, fraction)) = system::cast_ray(system_va, origin, direction)? else {
        return Ok(false);
    };
    let closer = heap::with_mut::<NativeRayCastResult, _>(hit_va, |r| {
        if fraction < r.fraction {
            r.body_id = body_id;
            r.fraction = fraction;
            true
        } else {
            false
        }
    })?;
    if closer {
        heap::with_mut::<NativeClosestHitCollector, _>(collector_va, |c| c.had_hit = true)?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_frees_embedded_hit() {
        let collector = create_closest_hit_collector();
        let hit_va = hit(collector).unwrap();
        assert!(!had_hit(collector).unwrap());
        assert_eq!(result(hit_va).unwrap(), (BodyId::INVALID, NO_HIT_FRACTION));

        heap::with_mut::<NativeRayCastResult, _>(hit_va, |r| r.fraction = 0.25).unwrap();
        reset(collector).unwrap();
        assert_eq!(result(hit_va).unwrap().1, NO_HIT_FRACTION);

        heap::free(collector).unwrap();
        assert!(!heap::is_live(hit_va));
    }
}
