// src/layers/hashgrid/mod.rs

//! # 다중 해상도 해시 그리드 인코딩
//!
//! 연속 3D 좌표마다 LOD별 코드북에서 셀의 8개 꼭짓점 피처를 조회하고 삼선형 보간한 뒤,
//! 레벨 순서대로 이어 붙여 하나의 피처 벡터를 만듭니다. 정점 수가 코드북 용량을 넘는
//! 고해상도 레벨은 공간 해시로 코드북에 접어 넣습니다.
//!
//! `HashGrid` 구조체는 코드북을 소유하는 레이어이고, 실제 연산은 `reference`(오라클)와
//! `kernel`(가속) 모듈에 있습니다.

pub mod function;
pub mod kernel;
pub mod layout;
pub mod reference;

#[cfg(test)]
mod __test__;

use ndarray::{Array2, ArrayView2};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;

use crate::error::{HashGridError, Result};
use crate::ops::precision::PrecisionPolicy;

pub use function::{hashgrid_interpolate, hashgrid_interpolate_backward, HashGridContext, HashGridGrads, HashGridInterpolate};
pub use kernel::ScatterStrategy;
pub use layout::{CodebookLayout, LevelPlan};
pub use reference::{hashgrid_naive, hashgrid_naive_backward};

/// 해시 그리드 설정
#[derive(Debug, Clone, PartialEq)]
pub struct HashGridConfig {
    pub resolutions: Vec<u32>,
    pub bitwidth: u32,
    pub feature_dim: usize,
    /// 코드북 초기화 표준편차
    pub feature_std: f32,
    /// 코드북 초기화 평균
    pub feature_bias: f32,
    pub precision: PrecisionPolicy,
    pub scatter: ScatterStrategy,
}

impl HashGridConfig {
    pub fn from_resolutions(resolutions: Vec<u32>, bitwidth: u32, feature_dim: usize) -> Self {
        Self {
            resolutions,
            bitwidth,
            feature_dim,
            feature_std: 0.0,
            feature_bias: 0.0,
            precision: PrecisionPolicy::default(),
            scatter: ScatterStrategy::default(),
        }
    }

    /// 기하급수적으로 증가하는 해상도 스케줄.
    ///
    /// `b = exp((ln max - ln min) / (L - 1))`, `res_l = 1 + floor(min * b^l)`
    pub fn from_geometric(
        min_res: u32,
        max_res: u32,
        num_lods: usize,
        bitwidth: u32,
        feature_dim: usize,
    ) -> Result<Self> {
        if num_lods == 0 {
            return Err(HashGridError::configuration("num_lods must be at least 1"));
        }
        if min_res == 0 || max_res < min_res {
            return Err(HashGridError::configuration(format!(
                "invalid geometric range min={} max={}",
                min_res, max_res
            )));
        }
        let growth = if num_lods == 1 {
            1.0
        } else {
            (((max_res as f64).ln() - (min_res as f64).ln()) / (num_lods - 1) as f64).exp()
        };
        let resolutions = (0..num_lods)
            .map(|l| 1 + (min_res as f64 * growth.powi(l as i32)).floor() as u32)
            .collect();
        Ok(Self::from_resolutions(resolutions, bitwidth, feature_dim))
    }

    pub fn with_init(mut self, feature_std: f32, feature_bias: f32) -> Self {
        self.feature_std = feature_std;
        self.feature_bias = feature_bias;
        self
    }

    pub fn with_precision(mut self, precision: PrecisionPolicy) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_scatter(mut self, scatter: ScatterStrategy) -> Self {
        self.scatter = scatter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        layout::validate_bitwidth(self.bitwidth)?;
        layout::validate_feature_dim_even(self.feature_dim)?;
        if self.resolutions.is_empty() {
            return Err(HashGridError::shape("resolution schedule is empty"));
        }
        for (lod, &res) in self.resolutions.iter().enumerate() {
            layout::validate_resolution(lod, res)?;
        }
        if self.resolutions.windows(2).any(|w| w[1] < w[0]) {
            log::debug!("resolution schedule {:?} is not non-decreasing", self.resolutions);
        }
        Ok(())
    }
}

/// 코드북을 소유하는 해시 그리드 레이어
pub struct HashGrid {
    config: HashGridConfig,
    layout: CodebookLayout,
    codebook: Array2<f32>,
}

impl HashGrid {
    /// 정규분포 `N(feature_bias, feature_std)`로 코드북을 초기화합니다.
    pub fn new(config: HashGridConfig) -> Result<Self> {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(config: HashGridConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let layout = CodebookLayout::from_resolutions(&config.resolutions, config.bitwidth);
        let dist = Normal::new(config.feature_bias, config.feature_std)
            .map_err(|e| HashGridError::configuration(e.to_string()))?;
        let codebook = Array2::random_using((layout.total_slots(), config.feature_dim), dist, rng);
        log::debug!(
            "hashgrid init: resolutions={:?} bitwidth={} slots={}",
            config.resolutions,
            config.bitwidth,
            layout.total_slots()
        );
        Ok(Self {
            config,
            layout,
            codebook,
        })
    }

    pub fn from_codebook(config: HashGridConfig, codebook: Array2<f32>) -> Result<Self> {
        config.validate()?;
        let layout = CodebookLayout::from_resolutions(&config.resolutions, config.bitwidth);
        if codebook.dim() != (layout.total_slots(), config.feature_dim) {
            return Err(HashGridError::shape(format!(
                "codebook must have shape {:?}, got {:?}",
                (layout.total_slots(), config.feature_dim),
                codebook.dim()
            )));
        }
        Ok(Self {
            config,
            layout,
            codebook,
        })
    }

    pub fn config(&self) -> &HashGridConfig {
        &self.config
    }

    pub fn layout(&self) -> &CodebookLayout {
        &self.layout
    }

    pub fn codebook(&self) -> &Array2<f32> {
        &self.codebook
    }

    pub fn codebook_mut(&mut self) -> &mut Array2<f32> {
        &mut self.codebook
    }

    pub fn num_lods(&self) -> usize {
        self.config.resolutions.len()
    }

    pub fn output_dim(&self, lod_idx: usize) -> usize {
        self.config.feature_dim * (self.clamp_lod(lod_idx) + 1)
    }

    fn clamp_lod(&self, lod_idx: usize) -> usize {
        let last = self.num_lods() - 1;
        if lod_idx > last {
            log::warn!("lod_idx {} exceeds the last level {}, clamping", lod_idx, last);
            last
        } else {
            lod_idx
        }
    }

    fn kernel(&self) -> HashGridInterpolate {
        HashGridInterpolate::new(self.config.precision, self.config.scatter)
    }

    /// 가속 경로 순전파. `lod_idx`가 `None`이면 모든 레벨.
    pub fn interpolate(&self, coords: &ArrayView2<f32>, lod_idx: Option<usize>) -> Result<Array2<f32>> {
        let lod_idx = self.clamp_lod(lod_idx.unwrap_or(self.num_lods() - 1));
        let (feats, _) = self.kernel().forward(
            coords.view(),
            &self.config.resolutions,
            self.config.bitwidth,
            lod_idx,
            self.codebook.view(),
            &self.layout.sizes,
            &self.layout.first_idx,
        )?;
        Ok(feats)
    }

    pub fn interpolate_naive(&self, coords: &ArrayView2<f32>, lod_idx: Option<usize>) -> Result<Array2<f32>> {
        let lod_idx = self.clamp_lod(lod_idx.unwrap_or(self.num_lods() - 1));
        hashgrid_naive(
            coords,
            &self.config.resolutions,
            self.config.bitwidth,
            lod_idx,
            &self.codebook.view(),
            &self.layout.sizes,
            &self.layout.first_idx,
        )
    }

    /// 순전파 + 컨텍스트. 역전파는 `HashGridInterpolate::backward`로.
    pub fn forward<'a>(
        &'a self,
        coords: ArrayView2<'a, f32>,
        lod_idx: Option<usize>,
    ) -> Result<(Array2<f32>, HashGridContext<'a>)> {
        let lod_idx = self.clamp_lod(lod_idx.unwrap_or(self.num_lods() - 1));
        self.kernel().forward(
            coords,
            &self.config.resolutions,
            self.config.bitwidth,
            lod_idx,
            self.codebook.view(),
            &self.layout.sizes,
            &self.layout.first_idx,
        )
    }

    /// 코드북 그래디언트 `[total_slots, F]`
    pub fn backward(
        &self,
        coords: &ArrayView2<f32>,
        grad_output: &ArrayView2<f32>,
        lod_idx: Option<usize>,
    ) -> Result<Array2<f32>> {
        let lod_idx = self.clamp_lod(lod_idx.unwrap_or(self.num_lods() - 1));
        let ctx = self.kernel().context(
            coords.view(),
            &self.config.resolutions,
            self.config.bitwidth,
            lod_idx,
            self.codebook.view(),
            &self.layout.sizes,
            &self.layout.first_idx,
        )?;
        HashGridInterpolate::backward(&ctx, grad_output, true).map(|g| g.codebook)
    }
}
