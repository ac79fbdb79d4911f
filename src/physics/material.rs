//! 物理材质

use crate::lifetime::counted::{fresh_target, release_target};
use crate::lifetime::wrapper::native_wrapper;
use crate::lifetime::{Ref, RefC, RefTarget};
use crate::native::material;
use crate::readonly::ConstPhysicsMaterial;
use crate::Result;

native_wrapper!(
    /// 物理材质（可计数）
    PhysicsMaterial,
    "PhysicsMaterial",
    release_target
);

impl RefTarget for PhysicsMaterial {}
impl ConstPhysicsMaterial for PhysicsMaterial {}

pub type PhysicsMaterialRef = Ref<PhysicsMaterial>;
pub type PhysicsMaterialRefC = RefC<PhysicsMaterial>;

impl PhysicsMaterial {
    pub fn new(debug_name: &str, debug_color: u32) -> Result<Self> {
        fresh_target(material::create(debug_name, debug_color))
    }

    /// 包装已存在的材质并持有一次计数
    pub(crate) fn share(va: u64) -> Result<Self> {
        fresh_target(va)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::NativeWrapper;

    #[test]
    fn test_material_properties() {
        let material = PhysicsMaterial::new("Rubber", 0xff00_ff00).unwrap();
        assert_eq!(material.debug_name().unwrap(), "Rubber");
        assert_eq!(material.debug_color().unwrap(), 0xff00_ff00);

        let shared = material.to_ref().unwrap();
        assert_eq!(shared.target_ref_count().unwrap(), 2);
        assert_eq!(shared.debug_name().unwrap(), "Rubber");
        material.close().unwrap();
        assert_eq!(shared.target_ref_count().unwrap(), 1);
    }
}
