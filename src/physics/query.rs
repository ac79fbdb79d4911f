//! 射线查询

use glam::{DVec3, Vec3};

use crate::lifetime::wrapper::{free_object, native_wrapper};
use crate::lifetime::NativeWrapper;
use crate::native::query;
use crate::Result;

use super::body::BodyId;

native_wrapper!(
    /// 只保留最近一次命中的射线收集器；可以跨多次投射累积
    ClosestHitCastRayCollector,
    "ClosestHitCastRayCollector",
    free_object
);

impl ClosestHitCastRayCollector {
    pub fn new() -> Self {
        Self::adopt(query::create_closest_hit_collector())
    }

    pub fn had_hit(&self) -> Result<bool> {
        Ok(query::had_hit(self.va()?)?)
    }

    /// 命中结果视图；收集器关闭后视图随之失效
    pub fn hit(&self) -> Result<RayCastResult> {
        let hit_va = query::hit(self.va()?)?;
        Ok(RayCastResult::contained(hit_va, self))
    }

    pub fn reset(&self) -> Result<()> {
        Ok(query::reset(self.va()?)?)
    }
}

impl Default for ClosestHitCastRayCollector {
    fn default() -> Self {
        Self::new()
    }
}

native_wrapper!(
    /// 命中结果（位于收集器内部）
    RayCastResult,
    "RayCastResult",
    free_object
);

impl RayCastResult {
    pub fn body_id(&self) -> Result<BodyId> {
        Ok(query::result(self.va()?)?.0)
    }

    /// 命中点在射线上的比例；未命中时略大于 1
    pub fn fraction(&self) -> Result<f32> {
        Ok(query::result(self.va()?)?.1)
    }

    /// 命中点的世界坐标
    pub fn contact_point(&self, origin: DVec3, direction: Vec3) -> Result<DVec3> {
        let fraction = self.fraction()?;
        Ok(origin + direction.as_dvec3() * f64::from(fraction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::system::fixture::*;
    use crate::readonly::EActivation;
    use crate::BridgeError;

    #[test]
    fn test_closest_hit_across_casts() {
        let world = TestWorld::new(8, 8);
        let floor = world.add_floor();
        let bodies = world.system.body_interface().unwrap();
        let ball = bodies
            .create_and_add_body(&world.sphere_settings(DVec3::new(3.0, 2.0, 0.0), 0.5), EActivation::DontActivate)
            .unwrap()
            .unwrap();
        world.step();

        let collector = ClosestHitCastRayCollector::new();
        let down = Vec3::new(0.0, -10.0, 0.0);
        assert!(world.system.cast_ray(DVec3::new(0.0, 5.0, 0.0), down, &collector).unwrap());
        let hit = collector.hit().unwrap();
        assert!(collector.had_hit().unwrap());
        assert_eq!(hit.body_id().unwrap(), floor);
        assert!((hit.fraction().unwrap() - 0.5).abs() < 1e-3);

        // 更近的命中替换结果，更远的不替换
        assert!(world.system.cast_ray(DVec3::new(3.0, 5.0, 0.0), down, &collector).unwrap());
        assert_eq!(hit.body_id().unwrap(), ball);
        assert!(world.system.cast_ray(DVec3::new(-3.0, 5.0, 0.0), down, &collector).unwrap());
        assert_eq!(hit.body_id().unwrap(), ball);
        let point = hit.contact_point(DVec3::new(3.0, 5.0, 0.0), down).unwrap();
        assert!((point.y - 2.5).abs() < 1e-2, "hit at {}", point);

        collector.reset().unwrap();
        assert!(!collector.had_hit().unwrap());
        assert!(!world.system.cast_ray(DVec3::new(0.0, 5.0, 0.0), -down, &collector).unwrap());
        assert!(!collector.had_hit().unwrap());
    }

    #[test]
    fn test_hit_view_dies_with_collector() {
        let collector = ClosestHitCastRayCollector::new();
        let hit = collector.hit().unwrap();
        assert_eq!(hit.body_id().unwrap(), BodyId::INVALID);
        assert!(hit.fraction().unwrap() > 1.0);

        collector.close().unwrap();
        assert!(matches!(hit.fraction(), Err(BridgeError::InvalidHandle { .. })));
    }
}
