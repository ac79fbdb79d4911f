//! 碰撞过滤
//!
//! 三张层表在创建物理系统时被读取，系统只记住它们的地址，由系统包装保活。
//! 组过滤表可计数，但刚体上只存裸地址，设置碰撞组的一方负责保活。

use crate::lifetime::counted::{fresh_target, release_target};
use crate::lifetime::wrapper::{free_object, native_wrapper};
use crate::lifetime::{NativeWrapper, Ref, RefTarget};
use crate::native::filter::{self, CollisionGroupData, INVALID_GROUP, MAX_OBJECT_LAYERS};
use crate::{check_index, BridgeError, Result};

native_wrapper!(
    /// 物体层 → 宽相层映射表
    BroadPhaseLayerInterfaceTable,
    "BroadPhaseLayerInterfaceTable",
    free_object
);

impl BroadPhaseLayerInterfaceTable {
    pub fn new(num_object_layers: u32, num_broad_phase_layers: u32) -> Result<Self> {
        if num_object_layers > MAX_OBJECT_LAYERS {
            return Err(BridgeError::OutOfRange {
                what: "object layer count",
                index: num_object_layers as u64,
                limit: MAX_OBJECT_LAYERS as u64 + 1,
            });
        }
        if num_broad_phase_layers == 0 || num_broad_phase_layers > u8::MAX as u32 + 1 {
            return Err(BridgeError::InvalidArgument(format!(
                "invalid broad phase layer count {}",
                num_broad_phase_layers
            )));
        }
        Ok(Self::adopt(filter::create_bp_interface(num_object_layers, num_broad_phase_layers)))
    }

    pub fn map_object_to_broad_phase_layer(&self, object_layer: u32, broad_phase_layer: u8) -> Result<()> {
        let va = self.va()?;
        let num_broad_phase_layers = filter::num_broad_phase_layers(va)?;
        check_index("broad phase layer", broad_phase_layer as u64, num_broad_phase_layers as u64)?;
        if !filter::map_object_to_broad_phase_layer(va, object_layer, broad_phase_layer)? {
            return Err(BridgeError::OutOfRange {
                what: "object layer",
                index: object_layer as u64,
                limit: MAX_OBJECT_LAYERS as u64,
            });
        }
        Ok(())
    }

    pub fn broad_phase_layer(&self, object_layer: u32) -> Result<u8> {
        filter::broad_phase_layer(self.va()?, object_layer)?.ok_or(BridgeError::OutOfRange {
            what: "object layer",
            index: object_layer as u64,
            limit: MAX_OBJECT_LAYERS as u64,
        })
    }

    pub fn num_broad_phase_layers(&self) -> Result<u32> {
        Ok(filter::num_broad_phase_layers(self.va()?)?)
    }
}

native_wrapper!(
    /// 物体层两两之间是否碰撞
    ObjectLayerPairFilterTable,
    "ObjectLayerPairFilterTable",
    free_object
);

impl ObjectLayerPairFilterTable {
    pub fn new(num_object_layers: u32) -> Result<Self> {
        check_index("object layer count", num_object_layers as u64, MAX_OBJECT_LAYERS as u64 + 1)?;
        Ok(Self::adopt(filter::create_ovo_filter(num_object_layers)))
    }

    fn set_collision(&self, layer1: u32, layer2: u32, enabled: bool) -> Result<()> {
        if !filter::set_layer_collision(self.va()?, layer1, layer2, enabled)? {
            return Err(BridgeError::OutOfRange {
                what: "object layer",
                index: layer1.max(layer2) as u64,
                limit: MAX_OBJECT_LAYERS as u64,
            });
        }
        Ok(())
    }

    pub fn enable_collision(&self, layer1: u32, layer2: u32) -> Result<()> {
        self.set_collision(layer1, layer2, true)
    }

    pub fn disable_collision(&self, layer1: u32, layer2: u32) -> Result<()> {
        self.set_collision(layer1, layer2, false)
    }

    pub fn should_collide(&self, layer1: u32, layer2: u32) -> Result<bool> {
        Ok(filter::layers_should_collide(self.va()?, layer1, layer2)?)
    }
}

native_wrapper!(
    /// 物体层与宽相层之间是否碰撞，由另外两张表推导
    ObjectVsBroadPhaseLayerFilterTable,
    "ObjectVsBroadPhaseLayerFilterTable",
    free_object
);

impl ObjectVsBroadPhaseLayerFilterTable {
    pub fn new(
        bp_interface: &BroadPhaseLayerInterfaceTable,
        num_broad_phase_layers: u32,
        pair_filter: &ObjectLayerPairFilterTable,
        num_object_layers: u32,
    ) -> Result<Self> {
        let va = filter::create_ovb_filter(
            bp_interface.va()?,
            num_broad_phase_layers,
            pair_filter.va()?,
            num_object_layers,
        )?;
        Ok(Self::adopt(va))
    }

    pub fn should_collide(&self, object_layer: u32, broad_phase_layer: u8) -> Result<bool> {
        Ok(filter::layer_and_broad_phase_should_collide(self.va()?, object_layer, broad_phase_layer)?)
    }
}

// ============================================================================
// 碰撞组
// ============================================================================

native_wrapper!(
    /// 同一组内子组之间的碰撞表（可计数）
    GroupFilterTable,
    "GroupFilterTable",
    release_target
);

impl RefTarget for GroupFilterTable {}

pub type GroupFilterTableRef = Ref<GroupFilterTable>;

impl GroupFilterTable {
    /// 默认所有子组之间都碰撞
    pub fn new(num_sub_groups: u32) -> Result<Self> {
        fresh_target(filter::create_group_filter(num_sub_groups))
    }

    pub(crate) fn share(va: u64) -> Result<Self> {
        fresh_target(va)
    }

    fn set_collision(&self, sub_group1: u32, sub_group2: u32, enabled: bool) -> Result<()> {
        if !filter::set_sub_group_collision(self.va()?, sub_group1, sub_group2, enabled)? {
            return Err(BridgeError::OutOfRange {
                what: "sub group",
                index: sub_group1.max(sub_group2) as u64,
                limit: self.num_sub_groups()? as u64,
            });
        }
        Ok(())
    }

    pub fn enable_collision(&self, sub_group1: u32, sub_group2: u32) -> Result<()> {
        self.set_collision(sub_group1, sub_group2, true)
    }

    pub fn disable_collision(&self, sub_group1: u32, sub_group2: u32) -> Result<()> {
        self.set_collision(sub_group1, sub_group2, false)
    }

    pub fn is_collision_enabled(&self, sub_group1: u32, sub_group2: u32) -> Result<bool> {
        Ok(filter::is_sub_group_collision_enabled(self.va()?, sub_group1, sub_group2)?)
    }

    pub fn num_sub_groups(&self) -> Result<u32> {
        Ok(crate::native::heap::with::<filter::NativeGroupFilterTable, _>(self.va()?, |t| {
            t.num_sub_groups
        })?)
    }
}

/// 碰撞组：过滤表 + 组号 + 子组号
///
/// 持有过滤表的包装；交给刚体或设置时由接收方继续保活。
#[derive(Debug, Clone)]
pub struct CollisionGroup {
    pub filter: Option<GroupFilterTable>,
    pub group_id: u32,
    pub sub_group_id: u32,
}

impl CollisionGroup {
    pub const INVALID_GROUP: u32 = INVALID_GROUP;

    pub fn new(filter: &GroupFilterTable, group_id: u32, sub_group_id: u32) -> Self {
        Self {
            filter: Some(filter.clone()),
            group_id,
            sub_group_id,
        }
    }

    /// 不参与组过滤
    pub fn none() -> Self {
        Self {
            filter: None,
            group_id: INVALID_GROUP,
            sub_group_id: INVALID_GROUP,
        }
    }

    pub fn is_none(&self) -> bool {
        self.group_id == INVALID_GROUP
    }

    pub(crate) fn to_data(&self) -> Result<CollisionGroupData> {
        let filter = match &self.filter {
            Some(filter) => filter.va()?,
            None => 0,
        };
        Ok(CollisionGroupData {
            filter,
            group_id: self.group_id,
            sub_group_id: self.sub_group_id,
        })
    }

    /// 由原生数据还原；过滤表包装取自保活表
    pub(crate) fn from_data(data: CollisionGroupData, filter: Option<GroupFilterTable>) -> Self {
        let filter = filter.filter(|f| f.va().ok() == Some(data.filter) && data.filter != 0);
        Self {
            filter,
            group_id: data.group_id,
            sub_group_id: data.sub_group_id,
        }
    }
}

impl Default for CollisionGroup {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_tables() {
        let bp = BroadPhaseLayerInterfaceTable::new(2, 2).unwrap();
        bp.map_object_to_broad_phase_layer(0, 0).unwrap();
        bp.map_object_to_broad_phase_layer(1, 1).unwrap();
        assert!(bp.map_object_to_broad_phase_layer(5, 0).is_err());
        assert!(bp.map_object_to_broad_phase_layer(0, 2).is_err());

        let ovo = ObjectLayerPairFilterTable::new(2).unwrap();
        ovo.enable_collision(0, 1).unwrap();
        ovo.enable_collision(1, 1).unwrap();
        assert!(ovo.should_collide(1, 0).unwrap());
        assert!(!ovo.should_collide(0, 0).unwrap());

        let ovb = ObjectVsBroadPhaseLayerFilterTable::new(&bp, 2, &ovo, 2).unwrap();
        assert!(ovb.should_collide(0, 1).unwrap());
        assert!(!ovb.should_collide(0, 0).unwrap());
        assert!(ovb.should_collide(1, 0).unwrap());
    }

    #[test]
    fn test_group_filter_table() {
        let table = GroupFilterTable::new(3).unwrap();
        assert!(table.is_collision_enabled(0, 1).unwrap());
        table.disable_collision(0, 1).unwrap();
        assert!(!table.is_collision_enabled(1, 0).unwrap());
        assert!(matches!(table.disable_collision(0, 3), Err(BridgeError::OutOfRange { .. })));

        let group = CollisionGroup::new(&table, 7, 2);
        let data = group.to_data().unwrap();
        assert_eq!(data.filter, table.va().unwrap());
        let restored = CollisionGroup::from_data(data, Some(table.clone()));
        assert!(restored.filter.unwrap().same_native_object(&table));
        assert_eq!(CollisionGroup::none().to_data().unwrap().group_id, INVALID_GROUP);
    }
}
