//! 叶片集合
//!
//! 以 `PairKey { layer, index }` 为键保存全部叶片对。
//! 所有查询都显式带层参数；每层可以拆成独立的集合交给各自的 IO 线程。

use crate::shape::ShapeParams;
use crate::{
    LayerCount, Leaf, LeafChanges, Layer, MlcConfig, ModelError, MotionScale, PairKey,
    PairOfLeaves, PositionTable, PredefinedShape, Side,
};
use mlc_protocol::{LeafStateReport, MlcFrame};
use std::collections::BTreeMap;
use tracing::debug;

/// 几何参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub number_of_pairs: usize,
    pub layers: LayerCount,
    pub pitch_mm: f64,
    pub side_opening_mm: f64,
    pub isocenter_offset_mm: f64,
    pub layer_offset_mm: f64,
    pub edge_offset_steps: i32,
}

impl From<&MlcConfig> for Geometry {
    fn from(config: &MlcConfig) -> Self {
        Self {
            number_of_pairs: config.number_of_pairs,
            layers: config.layers,
            pitch_mm: config.pitch_mm,
            side_opening_mm: config.side_opening_mm,
            isocenter_offset_mm: config.isocenter_offset_mm,
            layer_offset_mm: config.layer_offset_mm,
            edge_offset_steps: config.edge_offset_steps,
        }
    }
}

/// 叶片集合
#[derive(Debug, Clone, PartialEq)]
pub struct LeavesCollection {
    geometry: Geometry,
    scale: MotionScale,
    pairs: BTreeMap<PairKey, PairOfLeaves>,
}

impl LeavesCollection {
    /// 创建空集合
    pub fn new(geometry: Geometry, scale: MotionScale) -> Self {
        Self {
            geometry,
            scale,
            pairs: BTreeMap::new(),
        }
    }

    /// 按配置创建完整集合（N × L 个叶片对）
    pub fn from_config(config: &MlcConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let mut collection = Self::new(Geometry::from(config), config.scale());

        for &layer in config.layers.layers() {
            for index in 0..config.number_of_pairs {
                let make_leaf = |side: Side| -> Result<Leaf, ModelError> {
                    let mut leaf = Leaf::new(config.address_of(index, layer, side)?, side, layer);
                    leaf.frequency = config.default_frequency;
                    leaf.calibration_steps = config
                        .assignment(index, layer, side)
                        .and_then(|a| a.calibration_steps);
                    Ok(leaf)
                };
                let pair = PairOfLeaves::new(make_leaf(Side::Side1)?, make_leaf(Side::Side2)?)?;
                collection.insert_pair(PairKey::new(index, layer), pair)?;
            }
        }
        debug!(
            "Built leaves collection: {} pairs x {} layers",
            config.number_of_pairs,
            config.layers.count()
        );
        Ok(collection)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn scale(&self) -> &MotionScale {
        &self.scale
    }

    pub fn number_of_pairs(&self) -> usize {
        self.geometry.number_of_pairs
    }

    /// 插入一个叶片对
    ///
    /// 校验序号、层、地址非 0、同层地址唯一。
    pub fn insert_pair(&mut self, key: PairKey, pair: PairOfLeaves) -> Result<(), ModelError> {
        if key.index >= self.geometry.number_of_pairs {
            return Err(ModelError::PairIndexOutOfRange {
                index: key.index,
                number_of_pairs: self.geometry.number_of_pairs,
            });
        }
        if !self.geometry.layers.contains(key.layer) {
            return Err(ModelError::LayerNotConfigured(key.layer));
        }
        if pair.layer() != key.layer {
            return Err(ModelError::InvalidPair(format!(
                "pair belongs to {} but key is {}",
                pair.layer(),
                key.layer
            )));
        }
        for leaf in pair.leaves() {
            let address = leaf.address();
            if address == mlc_protocol::BROADCAST_ADDRESS {
                return Err(ModelError::ReservedAddress {
                    layer: key.layer,
                    pair: key.index,
                    side: leaf.side(),
                });
            }
            if let Some((other, _)) = self.find_by_address(address, key.layer)
                && other != key.index
            {
                return Err(ModelError::DuplicateAddress {
                    address,
                    layer: key.layer,
                });
            }
        }
        if pair.leaf(Side::Side1).address() == pair.leaf(Side::Side2).address() {
            return Err(ModelError::DuplicateAddress {
                address: pair.leaf(Side::Side1).address(),
                layer: key.layer,
            });
        }
        self.pairs.insert(key, pair);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// 是否已包含 N × L 个叶片对
    pub fn is_complete(&self) -> bool {
        self.len() == self.geometry.number_of_pairs * self.geometry.layers.count()
    }

    /// 集合中实际出现的层
    pub fn layers(&self) -> Vec<Layer> {
        let mut layers: Vec<Layer> = self.pairs.keys().map(|k| k.layer).collect();
        layers.dedup();
        layers
    }

    pub fn pair(&self, key: PairKey) -> Option<&PairOfLeaves> {
        self.pairs.get(&key)
    }

    pub fn pair_mut(&mut self, key: PairKey) -> Option<&mut PairOfLeaves> {
        self.pairs.get_mut(&key)
    }

    pub fn leaf(&self, index: usize, layer: Layer, side: Side) -> Option<&Leaf> {
        self.pair(PairKey::new(index, layer)).map(|p| p.leaf(side))
    }

    pub fn leaf_mut(&mut self, index: usize, layer: Layer, side: Side) -> Option<&mut Leaf> {
        self.pair_mut(PairKey::new(index, layer))
            .map(|p| p.leaf_mut(side))
    }

    /// 某层的全部叶片对（按序号）
    pub fn pairs_in_layer(&self, layer: Layer) -> impl Iterator<Item = (usize, &PairOfLeaves)> {
        self.pairs
            .range(PairKey::new(0, layer)..=PairKey::new(usize::MAX, layer))
            .map(|(k, p)| (k.index, p))
    }

    /// 某层的全部叶片（按序号，Side1 在前）
    pub fn leaves_in_layer(&self, layer: Layer) -> impl Iterator<Item = &Leaf> {
        self.pairs_in_layer(layer).flat_map(|(_, p)| p.leaves())
    }

    /// 全部叶片对
    pub fn iter(&self) -> impl Iterator<Item = (&PairKey, &PairOfLeaves)> {
        self.pairs.iter()
    }

    /// 按地址查找叶片，返回 `(叶片对序号, 侧)`
    pub fn find_by_address(&self, address: u8, layer: Layer) -> Option<(usize, Side)> {
        self.pairs_in_layer(layer)
            .find_map(|(index, pair)| pair.side_of(address).map(|side| (index, side)))
    }

    pub fn leaf_by_address(&self, address: u8, layer: Layer) -> Option<&Leaf> {
        let (index, side) = self.find_by_address(address, layer)?;
        self.leaf(index, layer, side)
    }

    pub fn leaf_by_address_mut(&mut self, address: u8, layer: Layer) -> Option<&mut Leaf> {
        let (index, side) = self.find_by_address(address, layer)?;
        self.leaf_mut(index, layer, side)
    }

    /// 某层全部叶片地址
    pub fn addresses_in_layer(&self, layer: Layer) -> Vec<u8> {
        self.leaves_in_layer(layer).map(Leaf::address).collect()
    }

    /// 把一帧状态应答应用到对应叶片
    ///
    /// 找不到地址时返回 `None`。
    pub fn apply_report(
        &mut self,
        layer: Layer,
        report: &LeafStateReport,
    ) -> Option<(usize, Side, LeafChanges)> {
        let (index, side) = self.find_by_address(report.address, layer)?;
        let leaf = self.leaf_mut(index, layer, side)?;
        Some((index, side, leaf.apply_report(report)))
    }

    // ========================================================================
    // 标定聚合
    // ========================================================================

    /// 某层某侧全部标定步数；任何一片缺失（或叶片对不全）时返回 `None`
    fn calibration_values(&self, side: Side, layer: Layer) -> Option<Vec<i32>> {
        if !self.geometry.layers.contains(layer) {
            return None;
        }
        (0..self.geometry.number_of_pairs)
            .map(|index| self.leaf(index, layer, side)?.calibration_steps)
            .collect()
    }

    /// 某层某侧最小标定步数
    pub fn min_calibration_steps(&self, side: Side, layer: Layer) -> Option<i32> {
        self.calibration_values(side, layer)?.into_iter().min()
    }

    /// 某层某侧最大标定步数
    pub fn max_calibration_steps(&self, side: Side, layer: Layer) -> Option<i32> {
        self.calibration_values(side, layer)?.into_iter().max()
    }

    /// 某层标定范围：Side1 最小值 + Side2 最小值
    pub fn calibration_range(&self, layer: Layer) -> Option<i32> {
        Some(
            self.min_calibration_steps(Side::Side1, layer)?
                + self.min_calibration_steps(Side::Side2, layer)?,
        )
    }

    /// 叶片到目标位置的距离（mm），已按同侧最小标定值修正
    ///
    /// 标定不全、叶片不存在或位置未知时返回 `None`。
    pub fn position_gap(&self, address: u8, layer: Layer) -> Option<f64> {
        let leaf = self.leaf_by_address(address, layer)?;
        leaf.actual_current_position()?;
        let min = self.min_calibration_steps(leaf.side(), layer)?;
        let offset = leaf.calibration_steps? - min;
        let movement = leaf.relative_movement() - offset;
        Some(self.scale.internal_distance(movement).abs())
    }

    // ========================================================================
    // 形状
    // ========================================================================

    /// 按预定义形状设置某层全部叶片的目标位置，并发布到位置表
    pub fn apply_predefined_shape(
        &mut self,
        layer: Layer,
        shape: PredefinedShape,
        table: &mut impl PositionTable,
    ) -> Result<(), ModelError> {
        if !self.geometry.layers.contains(layer) {
            return Err(ModelError::LayerNotConfigured(layer));
        }
        let range = if shape.needs_calibration() {
            self.calibration_range(layer)
                .ok_or(ModelError::CalibrationIncomplete { layer })?
        } else {
            0
        };
        let params = ShapeParams {
            number_of_pairs: self.geometry.number_of_pairs,
            pitch_mm: self.geometry.pitch_mm,
            side_opening_mm: self.geometry.side_opening_mm,
            steps_per_mm: self.scale.steps_per_mm,
            edge_offset_steps: self.geometry.edge_offset_steps,
            range,
        };

        let scale = self.scale;
        for (key, pair) in self
            .pairs
            .range_mut(PairKey::new(0, layer)..=PairKey::new(usize::MAX, layer))
        {
            let (side1, side2) = params.targets(shape, key.index);
            for (side, steps) in [(Side::Side1, side1), (Side::Side2, side2)] {
                pair.leaf_mut(side).required_position = steps;
                table.set_required_distance(*key, side, scale.internal_distance(steps));
            }
        }
        debug!("Applied shape {} to {}", shape, layer);
        Ok(())
    }

    /// 叶片对边界坐标（mm），共 N + 1 个
    ///
    /// 第 `i` 个边界为 `-N·pitch/2 + 等中心偏移 + i·pitch`，第二层再加层间偏移。
    pub fn pair_boundaries(&self, layer: Layer) -> Vec<f64> {
        let g = &self.geometry;
        let n = g.number_of_pairs as f64;
        let mut origin = -n * g.pitch_mm / 2.0 + g.isocenter_offset_mm;
        if layer == Layer::Layer2 {
            origin += g.layer_offset_mm;
        }
        (0..=g.number_of_pairs)
            .map(|i| origin + i as f64 * g.pitch_mm)
            .collect()
    }

    // ========================================================================
    // 批量指令
    // ========================================================================

    /// 某层全部叶片的绝对定位指令
    pub fn parameters_for_layer(&self, layer: Layer) -> Vec<MlcFrame> {
        self.leaves_in_layer(layer)
            .map(|leaf| leaf.set_parameters_command().to_frame())
            .collect()
    }

    /// 某层全部位置已知叶片的相对定位指令
    pub fn relative_parameters_for_layer(&self, layer: Layer) -> Vec<MlcFrame> {
        self.leaves_in_layer(layer)
            .filter(|leaf| leaf.actual_current_position().is_some())
            .map(|leaf| leaf.set_relative_parameters_command().to_frame())
            .collect()
    }

    /// 某层全部叶片的状态查询指令
    pub fn states_for_layer(&self, layer: Layer) -> Vec<MlcFrame> {
        self.leaves_in_layer(layer)
            .map(|leaf| leaf.get_state_command().to_frame())
            .collect()
    }

    // ========================================================================
    // 按层拆分
    // ========================================================================

    /// 拆成每层一个集合（几何参数相同）
    pub fn split_layers(self) -> BTreeMap<Layer, LeavesCollection> {
        let mut parts: BTreeMap<Layer, LeavesCollection> = BTreeMap::new();
        for (key, pair) in self.pairs {
            parts
                .entry(key.layer)
                .or_insert_with(|| LeavesCollection::new(self.geometry, self.scale))
                .pairs
                .insert(key, pair);
        }
        parts
    }

    /// 合并另一集合中的叶片对（同键覆盖）
    pub fn merge(&mut self, other: LeavesCollection) {
        self.pairs.extend(other.pairs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LeafAssignment;

    fn small_config() -> MlcConfig {
        MlcConfig {
            number_of_pairs: 4,
            ..Default::default()
        }
    }

    fn calibrate(collection: &mut LeavesCollection, layer: Layer, side: Side, values: &[i32]) {
        for (index, &value) in values.iter().enumerate() {
            collection
                .leaf_mut(index, layer, side)
                .unwrap()
                .calibration_steps = Some(value);
        }
    }

    #[test]
    fn test_from_config_is_complete() {
        let collection = LeavesCollection::from_config(&small_config()).unwrap();
        assert_eq!(collection.len(), 8);
        assert!(collection.is_complete());
        assert_eq!(collection.layers(), vec![Layer::Layer1, Layer::Layer2]);
        assert_eq!(collection.addresses_in_layer(Layer::Layer1), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(
            collection.addresses_in_layer(Layer::Layer2),
            vec![9, 10, 11, 12, 13, 14, 15, 16]
        );
    }

    #[test]
    fn test_find_by_address() {
        let collection = LeavesCollection::from_config(&small_config()).unwrap();
        assert_eq!(collection.find_by_address(6, Layer::Layer1), Some((2, Side::Side2)));
        assert_eq!(collection.find_by_address(9, Layer::Layer2), Some((0, Side::Side1)));
        assert_eq!(collection.find_by_address(9, Layer::Layer1), None);
        assert_eq!(collection.find_by_address(0, Layer::Layer1), None);
    }

    #[test]
    fn test_insert_rejects_duplicate_and_broadcast() {
        let mut collection = LeavesCollection::from_config(&small_config()).unwrap();
        let dup = PairOfLeaves::new(
            Leaf::new(1, Side::Side1, Layer::Layer1),
            Leaf::new(99, Side::Side2, Layer::Layer1),
        )
        .unwrap();
        assert!(matches!(
            collection.insert_pair(PairKey::new(3, Layer::Layer1), dup),
            Err(ModelError::DuplicateAddress { address: 1, .. })
        ));

        let broadcast = PairOfLeaves::new(
            Leaf::new(0, Side::Side1, Layer::Layer1),
            Leaf::new(98, Side::Side2, Layer::Layer1),
        )
        .unwrap();
        assert!(matches!(
            collection.insert_pair(PairKey::new(3, Layer::Layer1), broadcast),
            Err(ModelError::ReservedAddress { .. })
        ));

        let wrong_layer = PairOfLeaves::new(
            Leaf::new(90, Side::Side1, Layer::Layer2),
            Leaf::new(91, Side::Side2, Layer::Layer2),
        )
        .unwrap();
        assert!(matches!(
            collection.insert_pair(PairKey::new(3, Layer::Layer1), wrong_layer),
            Err(ModelError::InvalidPair(_))
        ));
    }

    #[test]
    fn test_calibration_range_unavailable_until_complete() {
        let mut collection = LeavesCollection::from_config(&small_config()).unwrap();
        let layer = Layer::Layer1;
        assert_eq!(collection.calibration_range(layer), None);

        calibrate(&mut collection, layer, Side::Side1, &[9_700, 9_650, 9_800, 9_690]);
        assert_eq!(collection.min_calibration_steps(Side::Side1, layer), Some(9_650));
        assert_eq!(collection.max_calibration_steps(Side::Side1, layer), Some(9_800));
        assert_eq!(collection.calibration_range(layer), None);

        // Side2 只差最后一片
        calibrate(&mut collection, layer, Side::Side2, &[9_600, 9_620, 9_610]);
        assert_eq!(collection.calibration_range(layer), None);

        calibrate(&mut collection, layer, Side::Side2, &[9_600, 9_620, 9_610, 9_630]);
        assert_eq!(collection.calibration_range(layer), Some(9_650 + 9_600));
        // 另一层仍然不可用
        assert_eq!(collection.calibration_range(Layer::Layer2), None);
    }

    #[test]
    fn test_calibration_from_config_table() {
        let mut config = MlcConfig {
            number_of_pairs: 1,
            layers: LayerCount::One,
            ..Default::default()
        };
        for (side, address, cal) in [(Side::Side1, 1, 9_000), (Side::Side2, 2, 9_100)] {
            config.leaves.push(LeafAssignment {
                pair: 0,
                layer: Layer::Layer1,
                side,
                address,
                calibration_steps: Some(cal),
            });
        }
        let collection = LeavesCollection::from_config(&config).unwrap();
        assert_eq!(collection.calibration_range(Layer::Layer1), Some(18_100));
    }

    #[test]
    fn test_position_gap() {
        let mut collection = LeavesCollection::from_config(&small_config()).unwrap();
        let layer = Layer::Layer1;
        assert_eq!(collection.position_gap(3, layer), None);

        calibrate(&mut collection, layer, Side::Side1, &[100, 150, 100, 100]);
        // 地址 3 = pair 1 side1，标定偏移 50 步
        let leaf = collection.leaf_by_address_mut(3, layer).unwrap();
        leaf.current_position = Some(1_000);
        leaf.required_position = 1_550;
        // (550 - 50) / 250 = 2mm
        assert_eq!(collection.position_gap(3, layer), Some(2.0));

        // 位置未知
        collection.leaf_by_address_mut(3, layer).unwrap().current_position = None;
        assert_eq!(collection.position_gap(3, layer), None);
    }

    #[test]
    fn test_apply_shape_requires_calibration() {
        let mut collection = LeavesCollection::from_config(&small_config()).unwrap();
        assert!(matches!(
            collection.apply_predefined_shape(Layer::Layer1, PredefinedShape::Close, &mut ()),
            Err(ModelError::CalibrationIncomplete {
                layer: Layer::Layer1
            })
        ));
        // Open 不依赖标定
        assert!(
            collection
                .apply_predefined_shape(Layer::Layer1, PredefinedShape::Open, &mut ())
                .is_ok()
        );
    }

    #[test]
    fn test_apply_shape_writes_leaves_and_table() {
        let mut collection = LeavesCollection::from_config(&small_config()).unwrap();
        let layer = Layer::Layer2;
        calibrate(&mut collection, layer, Side::Side1, &[10_000; 4]);
        calibrate(&mut collection, layer, Side::Side2, &[10_000; 4]);

        let mut table = BTreeMap::new();
        collection
            .apply_predefined_shape(layer, PredefinedShape::Close, &mut table)
            .unwrap();

        for (_, pair) in collection.pairs_in_layer(layer) {
            for leaf in pair.leaves() {
                assert_eq!(leaf.required_position, 10_000);
            }
        }
        // 第一层不受影响
        assert!(
            collection
                .leaves_in_layer(Layer::Layer1)
                .all(|l| l.required_position == 0)
        );
        assert_eq!(table.len(), 8);
        assert_eq!(table[&(PairKey::new(2, layer), Side::Side2)], 40.0);
    }

    #[test]
    fn test_pair_boundaries() {
        let config = MlcConfig {
            number_of_pairs: 4,
            isocenter_offset_mm: 1.0,
            layer_offset_mm: 2.5,
            ..Default::default()
        };
        let collection = LeavesCollection::from_config(&config).unwrap();
        assert_eq!(
            collection.pair_boundaries(Layer::Layer1),
            vec![-9.0, -4.0, 1.0, 6.0, 11.0]
        );
        assert_eq!(
            collection.pair_boundaries(Layer::Layer2),
            vec![-6.5, -1.5, 3.5, 8.5, 13.5]
        );
    }

    #[test]
    fn test_bulk_builders() {
        let mut collection = LeavesCollection::from_config(&small_config()).unwrap();
        let layer = Layer::Layer1;
        assert_eq!(collection.states_for_layer(layer).len(), 8);
        assert_eq!(collection.parameters_for_layer(layer).len(), 8);
        // 位置全部未知：没有相对指令
        assert!(collection.relative_parameters_for_layer(layer).is_empty());

        collection.leaf_mut(0, layer, Side::Side1).unwrap().current_position = Some(10);
        let frames = collection.relative_parameters_for_layer(layer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].address(), 1);
    }

    #[test]
    fn test_apply_report_by_address() {
        let mut collection = LeavesCollection::from_config(&small_config()).unwrap();
        let report = LeafStateReport {
            address: 12,
            current_position: Some(640),
            ..Default::default()
        };
        let (index, side, changes) = collection.apply_report(Layer::Layer2, &report).unwrap();
        assert_eq!((index, side), (1, Side::Side2));
        assert!(changes.position_changed);
        assert!(collection.apply_report(Layer::Layer1, &LeafStateReport {
            address: 200,
            ..Default::default()
        })
        .is_none());
    }

    #[test]
    fn test_split_and_merge() {
        let collection = LeavesCollection::from_config(&small_config()).unwrap();
        let original = collection.clone();
        let mut parts = collection.split_layers();
        assert_eq!(parts.len(), 2);
        let layer2 = parts.remove(&Layer::Layer2).unwrap();
        assert_eq!(layer2.layers(), vec![Layer::Layer2]);
        assert!(!layer2.is_complete());

        let mut merged = parts.remove(&Layer::Layer1).unwrap();
        merged.merge(layer2);
        assert_eq!(merged, original);
    }
}
