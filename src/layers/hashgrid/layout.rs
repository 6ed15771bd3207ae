// src/layers/hashgrid/layout.rs

//! # 코드북 세그먼트 메타데이터와 입력 검증
//!
//! 코드북은 레벨별 세그먼트가 이어 붙은 하나의 `[total_slots, F]` 행렬입니다.
//! `sizes[i]`는 세그먼트 용량, `first_idx[i]`는 평탄화된 시작 오프셋입니다.

use std::ops::Range;

use ndarray::ArrayView2;

use crate::error::{HashGridError, Result};
use crate::ops::hash::{self, GridRegime, MAX_BITWIDTH};
use crate::ops::trilinear;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodebookLayout {
    pub sizes: Vec<usize>,
    pub first_idx: Vec<usize>,
}

impl CodebookLayout {
    /// 해상도 스케줄로부터 세그먼트를 빈틈없이 연속 배치합니다.
    pub fn from_resolutions(resolutions: &[u32], bitwidth: u32) -> Self {
        let sizes: Vec<usize> = resolutions
            .iter()
            .map(|&res| hash::segment_size(res, bitwidth))
            .collect();
        let mut first_idx = Vec::with_capacity(sizes.len());
        let mut offset = 0usize;
        for &size in &sizes {
            first_idx.push(offset);
            offset += size;
        }
        Self { sizes, first_idx }
    }

    pub fn from_parts(sizes: Vec<usize>, first_idx: Vec<usize>) -> Self {
        Self { sizes, first_idx }
    }

    pub fn num_lods(&self) -> usize {
        self.sizes.len()
    }

    pub fn segment(&self, lod: usize) -> Range<usize> {
        self.first_idx[lod]..self.first_idx[lod].saturating_add(self.sizes[lod])
    }

    /// 코드북에 필요한 최소 행 수
    pub fn total_slots(&self) -> usize {
        self.sizes
            .iter()
            .zip(&self.first_idx)
            .map(|(size, first)| first.saturating_add(*size))
            .max()
            .unwrap_or(0)
    }

    /// 세그먼트 불변식 검사: 길이 일치, 용량 공식, 레벨 순서의 비중첩, 코드북 범위.
    pub fn validate(&self, resolutions: &[u32], bitwidth: u32, codebook_rows: usize) -> Result<()> {
        validate_bitwidth(bitwidth)?;
        let num_lods = resolutions.len();
        if self.sizes.len() != num_lods || self.first_idx.len() != num_lods {
            return Err(HashGridError::shape(format!(
                "expected {} codebook sizes and first indices, got {} and {}",
                num_lods,
                self.sizes.len(),
                self.first_idx.len()
            )));
        }

        for (lod, &res) in resolutions.iter().enumerate() {
            validate_resolution(lod, res)?;
            let expected = hash::segment_size(res, bitwidth);
            if self.sizes[lod] != expected {
                return Err(HashGridError::configuration(format!(
                    "codebook size of LOD {} is {}, expected min({}^3, 2^{}) = {}",
                    lod, self.sizes[lod], res, bitwidth, expected
                )));
            }
            let end = self.first_idx[lod].checked_add(self.sizes[lod]).ok_or_else(|| {
                HashGridError::shape(format!(
                    "codebook segment {} overflows: first index {} + size {}",
                    lod, self.first_idx[lod], self.sizes[lod]
                ))
            })?;
            if lod + 1 < num_lods && end > self.first_idx[lod + 1] {
                return Err(HashGridError::shape(format!(
                    "codebook segment {} ends at {} past the start of segment {} ({})",
                    lod,
                    end,
                    lod + 1,
                    self.first_idx[lod + 1]
                )));
            }
            if end > codebook_rows {
                return Err(HashGridError::shape(format!(
                    "codebook segment {} ends at {} but the codebook has {} rows",
                    lod, end, codebook_rows
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_bitwidth(bitwidth: u32) -> Result<()> {
    if bitwidth == 0 || bitwidth > MAX_BITWIDTH {
        return Err(HashGridError::configuration(format!(
            "codebook bitwidth must be in 1..={}, got {}",
            MAX_BITWIDTH, bitwidth
        )));
    }
    Ok(())
}

pub(crate) fn validate_resolution(lod: usize, res: u32) -> Result<()> {
    // res=1 이면 셀이 하나도 없음
    if res < 2 {
        return Err(HashGridError::configuration(format!(
            "resolution of LOD {} must be at least 2, got {}",
            lod, res
        )));
    }
    Ok(())
}

pub(crate) fn validate_feature_dim_even(feature_dim: usize) -> Result<()> {
    if feature_dim == 0 || feature_dim % 2 == 1 {
        return Err(HashGridError::configuration(format!(
            "the codebook feature dimension needs to be a non-zero multiple of 2, got {}",
            feature_dim
        )));
    }
    Ok(())
}

/// 한 레벨의 인덱싱에 필요한 모든 정보
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelPlan {
    pub res: u32,
    pub regime: GridRegime,
    pub first_idx: usize,
    pub size: usize,
}

impl LevelPlan {
    /// 8개 꼭짓점의 평탄화된 코드북 슬롯과 가중치.
    /// `plan_levels` 검증을 통과한 레벨만 만들어지므로 `first_idx + size`는 코드북 행 수 이하.
    #[inline]
    pub fn corner_slots(&self, coord: [f32; 3], bitwidth: u32) -> ([usize; 8], [f32; 8]) {
        let cell = trilinear::locate(coord, self.res);
        let mut slots = [0usize; 8];
        for (k, corner) in cell.corners().iter().enumerate() {
            slots[k] = self.first_idx + hash::grid_index(*corner, self.res, bitwidth, self.regime);
        }
        (slots, cell.weights())
    }
}

/// 진입점 공통 검증. 통과하면 `0..=lod_idx` 레벨의 계획을 돌려줍니다.
pub(crate) fn plan_levels(
    coords: &ArrayView2<f32>,
    resolutions: &[u32],
    bitwidth: u32,
    lod_idx: usize,
    codebook: &ArrayView2<f32>,
    codebook_sizes: &[usize],
    codebook_first_idx: &[usize],
) -> Result<Vec<LevelPlan>> {
    if coords.ncols() != 3 {
        return Err(HashGridError::shape(format!(
            "coords must have shape [batch, 3], got {:?}",
            coords.shape()
        )));
    }
    if resolutions.is_empty() {
        return Err(HashGridError::shape("resolution schedule is empty"));
    }
    if lod_idx >= resolutions.len() {
        return Err(HashGridError::configuration(format!(
            "lod_idx {} is out of range for {} levels",
            lod_idx,
            resolutions.len()
        )));
    }

    let layout = CodebookLayout::from_parts(codebook_sizes.to_vec(), codebook_first_idx.to_vec());
    layout.validate(resolutions, bitwidth, codebook.nrows())?;

    let out_of_domain = coords
        .outer_iter()
        .filter(|row| trilinear::is_out_of_domain(row.view()))
        .count();
    if out_of_domain > 0 {
        log::debug!(
            "{} of {} coordinates lie outside [-1, 1] and will be clipped",
            out_of_domain,
            coords.nrows()
        );
    }

    let levels: Vec<LevelPlan> = resolutions[..=lod_idx]
        .iter()
        .enumerate()
        .map(|(lod, &res)| {
            let regime = GridRegime::select(res, bitwidth);
            log::trace!("LOD {}: res={} regime={:?}", lod, res, regime);
            LevelPlan {
                res,
                regime,
                first_idx: layout.first_idx[lod],
                size: layout.sizes[lod],
            }
        })
        .collect();
    Ok(levels)
}
