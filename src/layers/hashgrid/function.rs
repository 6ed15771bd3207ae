// src/layers/hashgrid/function.rs

//! # 미분 가능 함수 경계
//!
//! 순전파는 출력과 함께 역전파 재현에 필요한 입력만 담은 컨텍스트를 돌려주고,
//! 역전파는 그 컨텍스트와 상위 그래디언트로 코드북 그래디언트를 계산합니다.
//! 좌표, 해상도, bitwidth, lod_idx, 세그먼트 메타데이터에는 그래디언트가 없습니다.

use ndarray::{Array2, ArrayView2};

use super::kernel::{self, ScatterStrategy};
use super::layout::{plan_levels, validate_feature_dim_even, LevelPlan};
use crate::error::{HashGridError, Result};
use crate::ops::precision::PrecisionPolicy;

/// 역전파를 위해 저장하는 상태. 코드북과 좌표는 호출자 소유로 빌려옵니다.
#[derive(Debug, Clone)]
pub struct HashGridContext<'a> {
    coords: ArrayView2<'a, f32>,
    codebook: ArrayView2<'a, f32>,
    levels: Vec<LevelPlan>,
    bitwidth: u32,
    feature_dim: usize,
    policy: PrecisionPolicy,
    strategy: ScatterStrategy,
}

impl<'a> HashGridContext<'a> {
    pub fn coords(&self) -> &ArrayView2<'a, f32> {
        &self.coords
    }

    pub fn codebook(&self) -> &ArrayView2<'a, f32> {
        &self.codebook
    }

    pub fn resolutions(&self) -> Vec<u32> {
        self.levels.iter().map(|l| l.res).collect()
    }

    pub fn codebook_first_idx(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.first_idx).collect()
    }

    pub fn bitwidth(&self) -> u32 {
        self.bitwidth
    }

    pub fn lod_idx(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// 순전파 출력 (= 역전파 입력 그래디언트) 형태
    pub fn output_dim(&self) -> (usize, usize) {
        (self.coords.nrows(), self.feature_dim * self.levels.len())
    }
}

/// 코드북 그래디언트. 그 외 입력들은 항상 그래디언트가 없습니다.
#[derive(Debug, Clone, PartialEq)]
pub struct HashGridGrads {
    pub codebook: Array2<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashGridInterpolate {
    pub policy: PrecisionPolicy,
    pub strategy: ScatterStrategy,
}

impl HashGridInterpolate {
    pub fn new(policy: PrecisionPolicy, strategy: ScatterStrategy) -> Self {
        Self { policy, strategy }
    }

    /// 입력을 검증하고 역전파 재현에 필요한 상태만 담은 컨텍스트를 만듭니다.
    pub fn context<'a>(
        &self,
        coords: ArrayView2<'a, f32>,
        resolutions: &[u32],
        codebook_bitwidth: u32,
        lod_idx: usize,
        codebook: ArrayView2<'a, f32>,
        codebook_sizes: &[usize],
        codebook_first_idx: &[usize],
    ) -> Result<HashGridContext<'a>> {
        let feature_dim = codebook.ncols();
        validate_feature_dim_even(feature_dim)?;
        let levels = plan_levels(
            &coords,
            resolutions,
            codebook_bitwidth,
            lod_idx,
            &codebook,
            codebook_sizes,
            codebook_first_idx,
        )?;
        Ok(HashGridContext {
            coords,
            codebook,
            levels,
            bitwidth: codebook_bitwidth,
            feature_dim,
            policy: self.policy,
            strategy: self.strategy,
        })
    }

    pub fn forward<'a>(
        &self,
        coords: ArrayView2<'a, f32>,
        resolutions: &[u32],
        codebook_bitwidth: u32,
        lod_idx: usize,
        codebook: ArrayView2<'a, f32>,
        codebook_sizes: &[usize],
        codebook_first_idx: &[usize],
    ) -> Result<(Array2<f32>, HashGridContext<'a>)> {
        let ctx = self.context(
            coords,
            resolutions,
            codebook_bitwidth,
            lod_idx,
            codebook,
            codebook_sizes,
            codebook_first_idx,
        )?;
        log::debug!(
            "hashgrid forward: batch={} lods={} feature_dim={} policy={:?}",
            ctx.coords.nrows(),
            ctx.levels.len(),
            ctx.feature_dim,
            ctx.policy
        );
        let feats = kernel::hashgrid_forward(&ctx.coords, &ctx.codebook, &ctx.levels, ctx.bitwidth, ctx.policy);
        Ok((feats, ctx))
    }

    /// 역전파. `needs_codebook_grad`가 false면 scatter 없이 0 버퍼를 즉시 반환합니다.
    pub fn backward(
        ctx: &HashGridContext<'_>,
        grad_output: &ArrayView2<f32>,
        needs_codebook_grad: bool,
    ) -> Result<HashGridGrads> {
        validate_feature_dim_even(ctx.feature_dim)?;
        if grad_output.dim() != ctx.output_dim() {
            return Err(HashGridError::shape(format!(
                "grad_output must have shape {:?}, got {:?}",
                ctx.output_dim(),
                grad_output.dim()
            )));
        }

        let codebook_rows = ctx.codebook.nrows();
        if !needs_codebook_grad {
            return Ok(HashGridGrads {
                codebook: Array2::zeros((codebook_rows, ctx.feature_dim)),
            });
        }

        log::debug!(
            "hashgrid backward: batch={} lods={} strategy={:?}",
            ctx.coords.nrows(),
            ctx.levels.len(),
            ctx.strategy
        );
        let codebook = kernel::hashgrid_backward(
            &ctx.coords,
            grad_output,
            &ctx.levels,
            ctx.bitwidth,
            codebook_rows,
            ctx.feature_dim,
            ctx.policy,
            ctx.strategy,
        )?;
        Ok(HashGridGrads { codebook })
    }
}

/// 해시 그리드 조회 + 보간 (가속 경로).
///
/// # 인자
/// * `coords` - `[batch, 3]` 좌표
/// * `resolutions` - 레벨별 해상도
/// * `codebook_bitwidth` - 코드북 용량 `2^bw`
/// * `lod_idx` - 집계할 마지막 LOD
/// * `codebook` - `[total_slots, F]`, F는 짝수
///
/// # 반환
/// `[batch, F * (lod_idx + 1)]` 피처
pub fn hashgrid_interpolate(
    coords: &ArrayView2<f32>,
    resolutions: &[u32],
    codebook_bitwidth: u32,
    lod_idx: usize,
    codebook: &ArrayView2<f32>,
    codebook_sizes: &[usize],
    codebook_first_idx: &[usize],
) -> Result<Array2<f32>> {
    let (feats, _) = HashGridInterpolate::default().forward(
        coords.view(),
        resolutions,
        codebook_bitwidth,
        lod_idx,
        codebook.view(),
        codebook_sizes,
        codebook_first_idx,
    )?;
    Ok(feats)
}

/// 컨텍스트 없이 한 번에 역전파. 입력은 순전파와 동일합니다.
pub fn hashgrid_interpolate_backward(
    coords: &ArrayView2<f32>,
    grad_output: &ArrayView2<f32>,
    resolutions: &[u32],
    codebook_bitwidth: u32,
    lod_idx: usize,
    codebook: &ArrayView2<f32>,
    codebook_sizes: &[usize],
    codebook_first_idx: &[usize],
    needs_codebook_grad: bool,
) -> Result<Array2<f32>> {
    let ctx = HashGridInterpolate::default().context(
        coords.view(),
        resolutions,
        codebook_bitwidth,
        lod_idx,
        codebook.view(),
        codebook_sizes,
        codebook_first_idx,
    )?;
    HashGridInterpolate::backward(&ctx, grad_output, needs_codebook_grad).map(|g| g.codebook)
}
