//! 가속 경로와 reference 경로의 일치성 테스트

use super::uniform;
use crate::layers::hashgrid::{hashgrid_naive, CodebookLayout, HashGridInterpolate, ScatterStrategy};
use crate::ops::precision::{Accumulation, PrecisionPolicy};
use approx::assert_abs_diff_eq;
use ndarray::Array2;

const RESOLUTIONS: [u32; 5] = [2, 4, 8, 16, 32];
const BITWIDTH: u32 = 10;

fn encode(policy: PrecisionPolicy, codebook: &Array2<f32>, coords: &Array2<f32>, lod_idx: usize) -> Array2<f32> {
    let layout = CodebookLayout::from_resolutions(&RESOLUTIONS, BITWIDTH);
    let (feats, _) = HashGridInterpolate::new(policy, ScatterStrategy::default())
        .forward(
            coords.view(),
            &RESOLUTIONS,
            BITWIDTH,
            lod_idx,
            codebook.view(),
            &layout.sizes,
            &layout.first_idx,
        )
        .unwrap();
    feats
}

fn reference(codebook: &Array2<f32>, coords: &Array2<f32>, lod_idx: usize) -> Array2<f32> {
    let layout = CodebookLayout::from_resolutions(&RESOLUTIONS, BITWIDTH);
    hashgrid_naive(
        &coords.view(),
        &RESOLUTIONS,
        BITWIDTH,
        lod_idx,
        &codebook.view(),
        &layout.sizes,
        &layout.first_idx,
    )
    .unwrap()
}

#[test]
fn test_full_precision_matches_reference() {
    let layout = CodebookLayout::from_resolutions(&RESOLUTIONS, BITWIDTH);
    let codebook = uniform(layout.total_slots(), 4, 1.0, 101);
    let coords = uniform(1000, 3, 1.0, 102);

    for lod_idx in [0, 2, 4] {
        let expected = reference(&codebook, &coords, lod_idx);
        let policy = PrecisionPolicy::full();
        let feats = encode(policy, &codebook, &coords, lod_idx);
        assert_eq!(feats.dim(), expected.dim());
        assert_abs_diff_eq!(feats, expected, epsilon = policy.tolerance());

        let policy = PrecisionPolicy::full().with_accumulation(Accumulation::InputPrecision);
        let feats = encode(policy, &codebook, &coords, lod_idx);
        assert_abs_diff_eq!(feats, expected, epsilon = policy.tolerance());
    }
}

#[test]
fn test_half_inputs_stay_within_tolerance() {
    let layout = CodebookLayout::from_resolutions(&RESOLUTIONS, BITWIDTH);
    let codebook = uniform(layout.total_slots(), 2, 0.1, 111);
    let coords = uniform(1000, 3, 1.0, 112);
    let expected = reference(&codebook, &coords, 4);

    for accumulation in [Accumulation::HigherPrecision, Accumulation::InputPrecision] {
        let policy = PrecisionPolicy::mixed().with_accumulation(accumulation);
        let feats = encode(policy, &codebook, &coords, 4);
        assert_abs_diff_eq!(feats, expected, epsilon = policy.tolerance());
    }
}

#[test]
fn test_accelerated_forward_is_reproducible() {
    let layout = CodebookLayout::from_resolutions(&RESOLUTIONS, BITWIDTH);
    let codebook = uniform(layout.total_slots(), 2, 1.0, 121);
    let coords = uniform(4096, 3, 1.0, 122);
    let first = encode(PrecisionPolicy::full(), &codebook, &coords, 4);
    let second = encode(PrecisionPolicy::full(), &codebook, &coords, 4);
    assert_eq!(first, second);
}

#[test]
fn test_empty_batch() {
    let layout = CodebookLayout::from_resolutions(&RESOLUTIONS, BITWIDTH);
    let codebook = uniform(layout.total_slots(), 2, 1.0, 131);
    let coords = Array2::<f32>::zeros((0, 3));
    assert_eq!(encode(PrecisionPolicy::full(), &codebook, &coords, 4).dim(), (0, 10));
    assert_eq!(reference(&codebook, &coords, 4).dim(), (0, 10));
}
