use layered_image::config::{default_layer_specs, LayerSpec};
use layered_image::engine::analyzer::{analyze, assign_layers, energy_x2, MAX_ENERGY};
use layered_image::engine::compositor::composite;
use layered_image::engine::{calc_target_dimensions, LayerStore, Mask, PixelBuffer};
use layered_image::OutputFormat;
use proptest::prelude::*;

fn image_strategy() -> impl Strategy<Value = PixelBuffer> {
    (1u32..=24, 1u32..=24).prop_flat_map(|(w, h)| {
        proptest::collection::vec(any::<u8>(), (w * h * 4) as usize)
            .prop_map(move |data| PixelBuffer::new(w, h, data).unwrap())
    })
}

/// Strictly increasing thresholds, 1..=6 layers.
fn specs_strategy() -> impl Strategy<Value = Vec<LayerSpec>> {
    proptest::collection::btree_set(0u16..=400, 1..=6).prop_flat_map(|thresholds| {
        let n = thresholds.len();
        proptest::collection::vec(1u8..=100, n).prop_map(move |qualities| {
            thresholds
                .iter()
                .zip(qualities)
                .enumerate()
                .map(|(i, (&t, q))| LayerSpec::new(format!("layer {i}"), t, q))
                .collect()
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_analysis_is_a_partition(
        pixels in image_strategy(),
        specs in specs_strategy(),
    ) {
        let mut store = LayerStore::from_specs(&specs, OutputFormat::Jpeg).unwrap();
        analyze(&pixels, &mut store);
        prop_assert!(store.is_partition(pixels.pixel_count()));
        prop_assert_eq!(store.total_pixel_count(), pixels.pixel_count());
        for layer in store.layers() {
            prop_assert_eq!(layer.pixel_count(), layer.mask().unwrap().count_ones());
        }
    }

    #[test]
    fn prop_pixels_land_in_first_admitting_layer(
        pixels in image_strategy(),
        specs in specs_strategy(),
    ) {
        let thresholds: Vec<u16> = specs.iter().map(|s| s.threshold).collect();
        let classes = assign_layers(&pixels, &thresholds);
        let (w, _) = pixels.dimensions();
        for (i, &class) in classes.iter().enumerate() {
            let e = energy_x2(&pixels, i as u32 % w, i as u32 / w);
            prop_assert!(e <= 2 * MAX_ENERGY);
            let class = class as usize;
            // only the last layer may hold energy above its own threshold
            if class + 1 < thresholds.len() {
                prop_assert!(u32::from(e) <= 2 * u32::from(thresholds[class]));
            }
            for earlier in &thresholds[..class] {
                prop_assert!(u32::from(e) > 2 * u32::from(*earlier));
            }
        }
    }

    #[test]
    fn prop_merge_is_union_of_masks(
        pixels in image_strategy(),
        picks in proptest::sample::subsequence(vec![0usize, 1, 2, 3], 2..=4),
    ) {
        let mut store = LayerStore::from_specs(&default_layer_specs(), OutputFormat::WebP).unwrap();
        analyze(&pixels, &mut store);
        let n = pixels.pixel_count();

        let mut expected = Mask::new(n);
        let mut expected_count = 0;
        for &i in &picks {
            let layer = store.get(i).unwrap();
            expected.union_with(layer.mask().unwrap());
            expected_count += layer.pixel_count();
        }

        let survivor = store.merge(&picks).unwrap();
        let merged = store.get(survivor).unwrap();
        prop_assert_eq!(merged.mask().unwrap(), &expected);
        prop_assert_eq!(merged.pixel_count(), expected_count);
        prop_assert_eq!(store.len(), 4 - picks.len() + 1);
        prop_assert!(store.is_partition(n));
    }

    #[test]
    fn prop_composite_with_identity_renditions_is_opaque_source(pixels in image_strategy()) {
        let mut store = LayerStore::from_specs(&default_layer_specs(), OutputFormat::Png).unwrap();
        analyze(&pixels, &mut store);
        let (w, h) = pixels.dimensions();
        let decoded: Vec<Option<PixelBuffer>> = (0..store.len()).map(|_| Some(pixels.clone())).collect();
        let out = composite(w, h, store.layers(), &decoded).unwrap();
        for i in 0..pixels.pixel_count() {
            let s = pixels.pixel(i);
            prop_assert_eq!(out.pixel(i), [s[0], s[1], s[2], 255]);
        }
    }

    #[test]
    fn prop_target_dimensions_never_upscale(
        w in 1u32..=10_000,
        h in 1u32..=10_000,
        max in 1u32..=10_000,
    ) {
        let (tw, th) = calc_target_dimensions(w, h, Some(max));
        prop_assert!(tw <= w && th <= h);
        prop_assert!(tw <= max || tw == w);
        prop_assert!(th >= 1);
    }
}
