//! 순전파/역전파 종단 테스트

use super::{uniform, vertex_coord};
use crate::error::HashGridError;
use crate::layers::hashgrid::{
    hashgrid_interpolate, hashgrid_interpolate_backward, hashgrid_naive, CodebookLayout,
    HashGridInterpolate,
};
use crate::ops::hash::{dense_index, GridRegime};
use crate::ops::trilinear::CORNER_OFFSETS;
use ndarray::{arr2, s, Array2};

#[test]
fn test_두_레벨_원점_예제() {
    // resolutions=[2,4], bw=4: LOD0 dense(8 <= 16), LOD1 hashed(64 > 16)
    let resolutions = [2u32, 4];
    let layout = CodebookLayout::from_resolutions(&resolutions, 4);
    assert_eq!(layout.sizes, vec![8, 16]);
    assert_eq!(GridRegime::select(2, 4), GridRegime::Dense);
    assert_eq!(GridRegime::select(4, 4), GridRegime::Hashed);

    let codebook = uniform(24, 2, 1.0, 7);
    let coords = arr2(&[[-1.0f32, -1.0, -1.0]]);

    let (feats, ctx) = HashGridInterpolate::default()
        .forward(
            coords.view(),
            &resolutions,
            4,
            1,
            codebook.view(),
            &layout.sizes,
            &layout.first_idx,
        )
        .unwrap();
    assert_eq!(feats.dim(), (1, 4));
    assert_eq!(feats[[0, 0]], codebook[[0, 0]]);
    assert_eq!(feats[[0, 1]], codebook[[0, 1]]);

    let naive = hashgrid_naive(
        &coords.view(),
        &resolutions,
        4,
        1,
        &codebook.view(),
        &layout.sizes,
        &layout.first_idx,
    )
    .unwrap();
    assert_eq!(naive.slice(s![.., 0..2]), feats.slice(s![.., 0..2]));

    // LOD0 슬라이스에만 1을 흘려보냄
    let grad_output = arr2(&[[1.0f32, 1.0, 0.0, 0.0]]);
    let grads = HashGridInterpolate::backward(&ctx, &grad_output.view(), true).unwrap();
    assert_eq!(grads.codebook.row(0).to_vec(), vec![1.0, 1.0]);
    for slot in 1..8 {
        assert_eq!(grads.codebook.row(slot).to_vec(), vec![0.0, 0.0], "slot {}", slot);
    }
    assert!(grads.codebook.slice(s![8.., ..]).iter().all(|&v| v == 0.0));
}

#[test]
fn test_꼭짓점_피처_정확_복원() {
    // res=4, bw=6: 4^3 == 2^6 이므로 dense
    let res = 4u32;
    let layout = CodebookLayout::from_resolutions(&[res], 6);
    assert_eq!(layout.sizes, vec![64]);
    let codebook = uniform(64, 4, 1.0, 11);

    let base = [1u32, 1, 1];
    let coords = Array2::from_shape_fn((8, 3), |(k, axis)| {
        let offset = CORNER_OFFSETS[k];
        let v = [base[0] + offset[0], base[1] + offset[1], base[2] + offset[2]];
        vertex_coord(v, res)[axis]
    });

    let feats =
        hashgrid_interpolate(&coords.view(), &[res], 6, 0, &codebook.view(), &layout.sizes, &layout.first_idx)
            .unwrap();
    let naive =
        hashgrid_naive(&coords.view(), &[res], 6, 0, &codebook.view(), &layout.sizes, &layout.first_idx).unwrap();

    for (k, offset) in CORNER_OFFSETS.iter().enumerate() {
        let slot = dense_index(base[0] + offset[0], base[1] + offset[1], base[2] + offset[2], res);
        assert_eq!(feats.row(k), codebook.row(slot), "corner {}", k);
        assert_eq!(naive.row(k), codebook.row(slot), "corner {}", k);
    }
}

#[test]
fn test_lod_prefix_is_bit_identical() {
    let resolutions = [4u32, 8, 16, 32];
    let bitwidth = 10;
    let layout = CodebookLayout::from_resolutions(&resolutions, bitwidth);
    let codebook = uniform(layout.total_slots(), 2, 1.0, 3);
    let coords = uniform(64, 3, 1.0, 5);

    let mut previous: Option<Array2<f32>> = None;
    for lod_idx in 0..resolutions.len() {
        let feats = hashgrid_interpolate(
            &coords.view(),
            &resolutions,
            bitwidth,
            lod_idx,
            &codebook.view(),
            &layout.sizes,
            &layout.first_idx,
        )
        .unwrap();
        assert_eq!(feats.ncols(), 2 * (lod_idx + 1));
        if let Some(prev) = previous {
            assert_eq!(feats.slice(s![.., ..prev.ncols()]), prev);
        }
        previous = Some(feats);
    }
}

#[test]
fn test_out_of_domain_coords_are_clipped() {
    let resolutions = [4u32, 16];
    let layout = CodebookLayout::from_resolutions(&resolutions, 8);
    let codebook = uniform(layout.total_slots(), 2, 1.0, 13);
    let outside = arr2(&[[1.7f32, -3.0, 0.25], [-1.01, 1.01, 1e6]]);
    let clipped = outside.mapv(|v| v.clamp(-1.0, 1.0));

    let encode = |c: &Array2<f32>| {
        hashgrid_interpolate(&c.view(), &resolutions, 8, 1, &codebook.view(), &layout.sizes, &layout.first_idx)
    };
    assert_eq!(encode(&outside).unwrap(), encode(&clipped).unwrap());
}

#[test]
fn test_odd_feature_dim_is_rejected_before_work() {
    let layout = CodebookLayout::from_resolutions(&[2], 4);
    let codebook = Array2::<f32>::zeros((8, 3));
    let coords = arr2(&[[0.0f32, 0.0, 0.0]]);

    let fwd = hashgrid_interpolate(&coords.view(), &[2], 4, 0, &codebook.view(), &layout.sizes, &layout.first_idx);
    assert!(matches!(fwd, Err(HashGridError::Configuration(_))));

    let grad_output = Array2::<f32>::zeros((1, 3));
    let bwd = hashgrid_interpolate_backward(
        &coords.view(),
        &grad_output.view(),
        &[2],
        4,
        0,
        &codebook.view(),
        &layout.sizes,
        &layout.first_idx,
        true,
    );
    assert!(matches!(bwd, Err(HashGridError::Configuration(_))));

    // reference 경로는 홀수 피처도 허용
    let naive = hashgrid_naive(&coords.view(), &[2], 4, 0, &codebook.view(), &layout.sizes, &layout.first_idx);
    assert_eq!(naive.unwrap().dim(), (1, 3));
}

#[test]
fn test_shape_mismatch_is_reported() {
    let layout = CodebookLayout::from_resolutions(&[2, 4], 4);
    let codebook = Array2::<f32>::zeros((24, 2));
    let coords = Array2::<f32>::zeros((2, 2));
    let err = hashgrid_interpolate(&coords.view(), &[2, 4], 4, 1, &codebook.view(), &layout.sizes, &layout.first_idx);
    assert!(matches!(err, Err(HashGridError::ShapeMismatch(_))));

    let coords = Array2::<f32>::zeros((2, 3));
    let err = hashgrid_interpolate(&coords.view(), &[2, 4], 4, 1, &codebook.view(), &layout.sizes[..1], &layout.first_idx);
    assert!(matches!(err, Err(HashGridError::ShapeMismatch(_))));

    // 오프셋 + 크기가 usize를 넘치는 메타데이터
    let err = hashgrid_interpolate(&coords.view(), &[2, 4], 4, 1, &codebook.view(), &[8, 16], &[0, usize::MAX]);
    assert!(matches!(err, Err(HashGridError::ShapeMismatch(_))));
    let err = hashgrid_naive(&coords.view(), &[2, 4], 4, 1, &codebook.view(), &[8, 16], &[0, usize::MAX]);
    assert!(matches!(err, Err(HashGridError::ShapeMismatch(_))));
}
