//! 叶片模型的属性测试

use mlc_model::{
    Layer, LayerCount, LeavesCollection, MlcConfig, MotionDirection, MotionScale,
    PredefinedShape, Side,
};
use proptest::prelude::*;

fn single_layer(number_of_pairs: usize) -> LeavesCollection {
    let config = MlcConfig {
        number_of_pairs,
        layers: LayerCount::One,
        ..Default::default()
    };
    LeavesCollection::from_config(&config).unwrap()
}

fn shape_strategy() -> impl Strategy<Value = PredefinedShape> {
    prop::sample::select(PredefinedShape::ALL.to_vec())
}

proptest! {
    /// 毫米 → 步数向零截断，误差小于一步
    #[test]
    fn steps_truncate_toward_zero(mm in -200.0f64..200.0) {
        let scale = MotionScale::default();
        let steps = scale.distance_to_internal_steps(mm);
        let back = scale.internal_distance(steps);
        prop_assert!(back.abs() <= mm.abs() + 1e-9);
        prop_assert!((mm - back).abs() < 1.0 / scale.steps_per_mm + 1e-9);
    }

    /// 步数 → 毫米 → 步数：设备范围内任意比例误差不超过一步
    #[test]
    fn steps_survive_distance_round_trip(
        steps in 0i32..=i32::from(u16::MAX),
        steps_per_mm in prop_oneof![
            prop::sample::select(vec![250.0f64, 3.3, 333.333, 0.7, 1234.5678]),
            0.5f64..2000.0,
        ],
        counts_per_mm in 0.5f64..2000.0,
    ) {
        let scale = MotionScale::new(steps_per_mm, counts_per_mm);

        let back = scale.distance_to_internal_steps(scale.internal_distance(steps));
        prop_assert!((back - steps).abs() <= 1, "{} -> {} at {} steps/mm", steps, back, steps_per_mm);

        let back = scale.distance_to_external_steps(scale.external_distance(steps));
        prop_assert!((back - steps).abs() <= 1, "{} -> {} at {} counts/mm", steps, back, counts_per_mm);
    }

    /// 相对定位指令：步数为差值绝对值，方向由符号决定
    #[test]
    fn relative_command_matches_movement(
        current in 0i32..30_000,
        required in 0i32..30_000,
    ) {
        let mut collection = single_layer(1);
        let leaf = collection.leaf_mut(0, Layer::Layer1, Side::Side1).unwrap();
        leaf.current_position = Some(current);
        leaf.required_position = required;

        let cmd = leaf.set_relative_parameters_command();
        prop_assert_eq!(i32::from(cmd.steps), (required - current).abs());
        if required > current {
            prop_assert_eq!(cmd.direction(), MotionDirection::AwayFromSwitch);
        } else if required < current {
            prop_assert_eq!(cmd.direction(), MotionDirection::TowardSwitch);
        }
    }

    /// 标定范围等于两侧最小标定值之和
    #[test]
    fn calibration_range_is_sum_of_minimums(
        side1 in prop::collection::vec(1_000i32..20_000, 8),
        side2 in prop::collection::vec(1_000i32..20_000, 8),
    ) {
        let mut collection = single_layer(8);
        for (index, (&a, &b)) in side1.iter().zip(side2.iter()).enumerate() {
            collection.leaf_mut(index, Layer::Layer1, Side::Side1).unwrap().calibration_steps = Some(a);
            collection.leaf_mut(index, Layer::Layer1, Side::Side2).unwrap().calibration_steps = Some(b);
        }
        let expected = side1.iter().min().unwrap() + side2.iter().min().unwrap();
        prop_assert_eq!(collection.calibration_range(Layer::Layer1), Some(expected));
        prop_assert_eq!(
            collection.max_calibration_steps(Side::Side2, Layer::Layer1),
            side2.iter().max().copied()
        );
    }

    /// 任何形状生成的两侧目标之和都不超过标定范围
    #[test]
    fn shapes_never_overlap(
        shape in shape_strategy(),
        calibration in 2_000i32..20_000,
        pairs in 1usize..=16,
    ) {
        let mut collection = single_layer(pairs);
        for index in 0..pairs {
            for side in Side::ALL {
                collection.leaf_mut(index, Layer::Layer1, side).unwrap().calibration_steps =
                    Some(calibration);
            }
        }
        collection.apply_predefined_shape(Layer::Layer1, shape, &mut ()).unwrap();

        let range = 2 * calibration;
        for (_, pair) in collection.pairs_in_layer(Layer::Layer1) {
            let s1 = pair.leaf(Side::Side1).required_position;
            let s2 = pair.leaf(Side::Side2).required_position;
            prop_assert!(s1 >= 0 && s2 >= 0);
            prop_assert!(s1 + s2 <= range, "{}: {} + {} > {}", shape, s1, s2, range);
        }
    }
}
