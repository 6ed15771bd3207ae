// src/layers/hashgrid/reference.rs

//! # 해시 그리드 reference 구현
//!
//! 레벨을 하나씩 순차적으로 처리하는 느리지만 읽기 쉬운 구현입니다.
//! f64로 누산하며, 가속 경로의 정확성 검증용 오라클로 사용합니다.
//! 가속 경로와 비트 단위로 일치하지는 않습니다 (누산 순서와 정밀도가 다름).

use ndarray::{concatenate, s, Array2, Array3, ArrayView2, Axis};

use super::layout::{plan_levels, LevelPlan};
use crate::error::{HashGridError, Result};
use crate::ops::hash;
use crate::ops::trilinear;

/// 레벨 하나의 꼭짓점 인덱스 `[B, 8]` (세그먼트 내부 인덱스)와 보간 계수 `[B, 8]`
fn level_indices(coords: &ArrayView2<f32>, level: &LevelPlan, bitwidth: u32) -> (Array2<usize>, Array2<f64>) {
    let batch = coords.nrows();
    let mut cidx = Array2::<usize>::zeros((batch, 8));
    let mut coeffs = Array2::<f64>::zeros((batch, 8));

    for (i, row) in coords.outer_iter().enumerate() {
        let cell = trilinear::locate_row(row, level.res);
        for (k, corner) in cell.corners().iter().enumerate() {
            cidx[[i, k]] = hash::grid_index(*corner, level.res, bitwidth, level.regime);
        }
        for (k, w) in cell.weights().iter().enumerate() {
            coeffs[[i, k]] = *w as f64;
        }
    }
    (cidx, coeffs)
}

/// 순차 reference 순전파.
///
/// # 인자
/// * `coords` - `[batch, 3]`, 각 성분은 [-1, 1]로 정규화된 좌표 (밖이면 클리핑)
/// * `resolutions` - 레벨별 격자 해상도
/// * `codebook_bitwidth` - 코드북 용량 `2^bw`
/// * `lod_idx` - 집계할 마지막 LOD
/// * `codebook` - 레벨별 코드북을 이어 붙인 `[total_slots, F]`
/// * `codebook_lod_sizes`, `codebook_lod_first_idx` - 세그먼트 크기와 시작 오프셋
///
/// # 반환
/// `[batch, F * (lod_idx + 1)]` 피처
pub fn hashgrid_naive(
    coords: &ArrayView2<f32>,
    resolutions: &[u32],
    codebook_bitwidth: u32,
    lod_idx: usize,
    codebook: &ArrayView2<f32>,
    codebook_lod_sizes: &[usize],
    codebook_lod_first_idx: &[usize],
) -> Result<Array2<f32>> {
    let levels = plan_levels(
        coords,
        resolutions,
        codebook_bitwidth,
        lod_idx,
        codebook,
        codebook_lod_sizes,
        codebook_lod_first_idx,
    )?;
    let batch = coords.nrows();
    let feature_dim = codebook.ncols();

    let mut feats = Vec::with_capacity(levels.len());
    for level in &levels {
        let (cidx, coeffs) = level_indices(coords, level, codebook_bitwidth);
        let segment = codebook.slice(s![level.first_idx..level.first_idx + level.size, ..]);

        // B*8, F
        let flat: Vec<usize> = cidx.iter().copied().collect();
        let fs = segment.select(Axis(0), &flat).mapv(f64::from);
        // B, 8, F
        let fs: Array3<f64> = fs
            .into_shape((batch, 8, feature_dim))
            .map_err(|e| HashGridError::shape(e.to_string()))?;

        // B, 8, 1
        let coeffs = coeffs.insert_axis(Axis(2));
        feats.push((&fs * &coeffs).sum_axis(Axis(1)));
    }

    let views: Vec<_> = feats.iter().map(|f| f.view()).collect();
    let out = concatenate(Axis(1), &views).map_err(|e| HashGridError::shape(e.to_string()))?;
    Ok(out.mapv(|v| v as f32))
}

/// 순차 reference 역전파. 모든 (샘플, 레벨, 꼭짓점) 기여를 f64 버퍼에 더합니다.
///
/// 가속 역전파의 오라클로만 사용되므로 피처 차원 짝수 제약이 없습니다.
pub fn hashgrid_naive_backward(
    coords: &ArrayView2<f32>,
    grad_output: &ArrayView2<f32>,
    resolutions: &[u32],
    codebook_bitwidth: u32,
    lod_idx: usize,
    codebook: &ArrayView2<f32>,
    codebook_lod_sizes: &[usize],
    codebook_lod_first_idx: &[usize],
) -> Result<Array2<f32>> {
    let levels = plan_levels(
        coords,
        resolutions,
        codebook_bitwidth,
        lod_idx,
        codebook,
        codebook_lod_sizes,
        codebook_lod_first_idx,
    )?;
    let feature_dim = codebook.ncols();
    let expected = (coords.nrows(), feature_dim * levels.len());
    if grad_output.dim() != expected {
        return Err(HashGridError::shape(format!(
            "grad_output must have shape {:?}, got {:?}",
            expected,
            grad_output.dim()
        )));
    }

    let mut grad = Array2::<f64>::zeros(codebook.dim());
    for (lod, level) in levels.iter().enumerate() {
        let (cidx, coeffs) = level_indices(coords, level, codebook_bitwidth);
        let g_level = grad_output.slice(s![.., lod * feature_dim..(lod + 1) * feature_dim]);
        for i in 0..coords.nrows() {
            let g = g_level.row(i).mapv(f64::from);
            for k in 0..8 {
                let slot = level.first_idx + cidx[[i, k]];
                grad.row_mut(slot).scaled_add(coeffs[[i, k]], &g);
            }
        }
    }
    Ok(grad.mapv(|v| v as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2};

    #[test]
    fn test_naive_single_level_dense_corner() {
        // res=2, bw=4: dense, 슬롯 0 = 꼭짓점 (0,0,0)
        let codebook = Array2::from_shape_fn((8, 2), |(i, j)| (i * 10 + j) as f32);
        let coords = arr2(&[[-1.0f32, -1.0, -1.0], [1.0, 1.0, 1.0]]);
        let out = hashgrid_naive(&coords.view(), &[2], 4, 0, &codebook.view(), &[8], &[0]).unwrap();
        assert_eq!(out.dim(), (2, 2));
        assert_eq!(out.row(0).to_vec(), vec![0.0, 1.0]);
        // (1,1,1) 은 클리핑되어 꼭짓점 7 (= 1 + 2 + 4)에 거의 붙음
        assert!((out[[1, 0]] - 70.0).abs() < 1e-2);
    }

    #[test]
    fn test_naive_backward_matches_weights() {
        let codebook = Array2::<f32>::zeros((8, 2));
        // res=2 에서 -0.5 → t=0.5, 셀 중앙이므로 모든 가중치 1/8
        let coords = arr2(&[[-0.5f32, -0.5, -0.5]]);
        let grad_output = arr2(&[[8.0f32, -8.0]]);
        let grad = hashgrid_naive_backward(
            &coords.view(),
            &grad_output.view(),
            &[2],
            4,
            0,
            &codebook.view(),
            &[8],
            &[0],
        )
        .unwrap();
        for row in grad.outer_iter() {
            assert!((row[0] - 1.0).abs() < 1e-6);
            assert!((row[1] + 1.0).abs() < 1e-6);
        }
    }
}
