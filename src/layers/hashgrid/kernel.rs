// src/layers/hashgrid/kernel.rs

//! # 해시 그리드 가속 커널
//!
//! 순전파는 출력 행(샘플)마다 하나의 rayon 작업으로, 각 작업 안에서 레벨과 8개 꼭짓점,
//! 피처 쌍을 순회합니다. 역전파는 (샘플, 레벨) 단위로 병렬화하며 공유 코드북 슬롯에
//! 대한 누산만이 유일한 동기화 지점입니다.
//!
//! 순전파와 f32 누산 역전파는 피처를 두 개씩 묶어서 처리하므로 피처 차원은 짝수여야 합니다.

use std::sync::atomic::{AtomicU64, Ordering};

use half::f16;
use ndarray::{s, Array2, ArrayView2, Axis};
use rayon::prelude::*;

use super::layout::LevelPlan;
use crate::error::{HashGridError, Result};
use crate::ops::precision::{weighted_sum, Accumulation, Accumulator, PrecisionPolicy};

/// 역전파에서 별칭(aliased) 슬롯에 누산하는 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScatterStrategy {
    /// 슬롯 원소를 CAS 루프로 직접 더함 (f32는 피처 쌍 단위, f64는 원소 단위).
    /// 누산 순서는 실행마다 다를 수 있음.
    #[default]
    Atomic,
    /// 기여를 목적지 슬롯 기준으로 정렬한 뒤 구간별로 합산. 실행 간 비트 단위로 재현됨.
    SortReduce,
}

#[inline]
fn cast_coord(coords: &ArrayView2<f32>, i: usize, policy: &PrecisionPolicy) -> [f32; 3] {
    [
        policy.cast_input(coords[[i, 0]]),
        policy.cast_input(coords[[i, 1]]),
        policy.cast_input(coords[[i, 2]]),
    ]
}

/// 가속 순전파. 출력은 `[batch, F * levels.len()]`.
pub fn hashgrid_forward(
    coords: &ArrayView2<f32>,
    codebook: &ArrayView2<f32>,
    levels: &[LevelPlan],
    bitwidth: u32,
    policy: PrecisionPolicy,
) -> Array2<f32> {
    match (policy.half_inputs, policy.accumulation) {
        (_, Accumulation::HigherPrecision) => forward_impl::<f64>(coords, codebook, levels, bitwidth, policy),
        (false, Accumulation::InputPrecision) => forward_impl::<f32>(coords, codebook, levels, bitwidth, policy),
        (true, Accumulation::InputPrecision) => forward_impl::<f16>(coords, codebook, levels, bitwidth, policy),
    }
}

fn forward_impl<A: Accumulator>(
    coords: &ArrayView2<f32>,
    codebook: &ArrayView2<f32>,
    levels: &[LevelPlan],
    bitwidth: u32,
    policy: PrecisionPolicy,
) -> Array2<f32> {
    let batch = coords.nrows();
    let feature_dim = codebook.ncols();
    let mut feats = Array2::<f32>::zeros((batch, feature_dim * levels.len()));

    feats
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            let coord = cast_coord(coords, i, &policy);
            for (lod, level) in levels.iter().enumerate() {
                let (slots, weights) = level.corner_slots(coord, bitwidth);
                let offset = lod * feature_dim;
                for j in (0..feature_dim).step_by(2) {
                    let mut lo = [0f32; 8];
                    let mut hi = [0f32; 8];
                    for k in 0..8 {
                        lo[k] = policy.cast_input(codebook[[slots[k], j]]);
                        hi[k] = policy.cast_input(codebook[[slots[k], j + 1]]);
                    }
                    row[offset + j] = weighted_sum::<A>(&weights, &lo);
                    row[offset + j + 1] = weighted_sum::<A>(&weights, &hi);
                }
            }
        });

    feats
}

#[inline]
fn pack_pair(lo: f32, hi: f32) -> u64 {
    (lo.to_bits() as u64) | ((hi.to_bits() as u64) << 32)
}

#[inline]
fn unpack_pair(bits: u64) -> (f32, f32) {
    (f32::from_bits(bits as u32), f32::from_bits((bits >> 32) as u32))
}

/// 피처 쌍 `(lo, hi)`를 한 번의 compare-exchange로 누산
#[inline]
fn atomic_add_pair(cell: &AtomicU64, lo: f32, hi: f32) {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        let (a, b) = unpack_pair(current);
        let next = pack_pair(a + lo, b + hi);
        match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

/// `cell`에 f64 값 하나를 compare-exchange로 누산
#[inline]
fn atomic_add_f64(cell: &AtomicU64, v: f64) {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        let next = (f64::from_bits(current) + v).to_bits();
        match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

/// 가속 역전파. 반환값은 코드북과 같은 `[codebook_rows, F]` 형태의 그래디언트.
///
/// 정밀도 정책의 f16 옵션은 입력 양자화에만 적용됩니다. 슬롯 누산은 두 전략 모두
/// `HigherPrecision`이면 f64, 아니면 f32로 수행하여 저장 정밀도 아래로 내려가지 않습니다.
pub fn hashgrid_backward(
    coords: &ArrayView2<f32>,
    grad_output: &ArrayView2<f32>,
    levels: &[LevelPlan],
    bitwidth: u32,
    codebook_rows: usize,
    feature_dim: usize,
    policy: PrecisionPolicy,
    strategy: ScatterStrategy,
) -> Result<Array2<f32>> {
    match (strategy, policy.scatter_in_f64()) {
        (ScatterStrategy::Atomic, true) => {
            scatter_atomic_wide(coords, grad_output, levels, bitwidth, codebook_rows, feature_dim, policy)
        }
        (ScatterStrategy::Atomic, false) => {
            scatter_atomic_pairs(coords, grad_output, levels, bitwidth, codebook_rows, feature_dim, policy)
        }
        (ScatterStrategy::SortReduce, true) => {
            scatter_sorted::<f64>(coords, grad_output, levels, bitwidth, codebook_rows, feature_dim, policy)
        }
        (ScatterStrategy::SortReduce, false) => {
            scatter_sorted::<f32>(coords, grad_output, levels, bitwidth, codebook_rows, feature_dim, policy)
        }
    }
}

/// f32 피처 쌍을 `AtomicU64` 하나에 묶어 누산
fn scatter_atomic_pairs(
    coords: &ArrayView2<f32>,
    grad_output: &ArrayView2<f32>,
    levels: &[LevelPlan],
    bitwidth: u32,
    codebook_rows: usize,
    feature_dim: usize,
    policy: PrecisionPolicy,
) -> Result<Array2<f32>> {
    let pairs = feature_dim / 2;
    // 0u64 == (0.0f32, 0.0f32)
    let grad: Vec<AtomicU64> = (0..codebook_rows * pairs).map(|_| AtomicU64::new(0)).collect();
    let num_lods = levels.len();

    (0..coords.nrows() * num_lods).into_par_iter().for_each(|unit| {
        let (i, lod) = (unit / num_lods, unit % num_lods);
        let level = &levels[lod];
        let coord = cast_coord(coords, i, &policy);
        let (slots, weights) = level.corner_slots(coord, bitwidth);
        let g = grad_output.slice(s![i, lod * feature_dim..(lod + 1) * feature_dim]);

        for k in 0..8 {
            let w = weights[k];
            // 가중치 0은 기여 없음
            if w == 0.0 {
                continue;
            }
            let base = slots[k] * pairs;
            for p in 0..pairs {
                atomic_add_pair(&grad[base + p], w * g[2 * p], w * g[2 * p + 1]);
            }
        }
    });

    let mut data = Vec::with_capacity(codebook_rows * feature_dim);
    for cell in grad {
        let (lo, hi) = unpack_pair(cell.into_inner());
        data.push(lo);
        data.push(hi);
    }
    Array2::from_shape_vec((codebook_rows, feature_dim), data)
        .map_err(|e| HashGridError::shape(e.to_string()))
}

/// 피처마다 f64 비트를 담은 `AtomicU64`로 누산
fn scatter_atomic_wide(
    coords: &ArrayView2<f32>,
    grad_output: &ArrayView2<f32>,
    levels: &[LevelPlan],
    bitwidth: u32,
    codebook_rows: usize,
    feature_dim: usize,
    policy: PrecisionPolicy,
) -> Result<Array2<f32>> {
    // 0u64 == 0.0f64
    let grad: Vec<AtomicU64> = (0..codebook_rows * feature_dim).map(|_| AtomicU64::new(0)).collect();
    let num_lods = levels.len();

    (0..coords.nrows() * num_lods).into_par_iter().for_each(|unit| {
        let (i, lod) = (unit / num_lods, unit % num_lods);
        let level = &levels[lod];
        let coord = cast_coord(coords, i, &policy);
        let (slots, weights) = level.corner_slots(coord, bitwidth);
        let g = grad_output.slice(s![i, lod * feature_dim..(lod + 1) * feature_dim]);

        for k in 0..8 {
            let w = weights[k];
            if w == 0.0 {
                continue;
            }
            let base = slots[k] * feature_dim;
            for (j, &gv) in g.iter().enumerate() {
                atomic_add_f64(&grad[base + j], w as f64 * gv as f64);
            }
        }
    });

    let data: Vec<f32> = grad
        .into_iter()
        .map(|cell| f64::from_bits(cell.into_inner()) as f32)
        .collect();
    Array2::from_shape_vec((codebook_rows, feature_dim), data)
        .map_err(|e| HashGridError::shape(e.to_string()))
}

/// 하나의 (샘플, 레벨, 꼭짓점) 기여
#[derive(Debug, Clone, Copy)]
struct Contribution {
    slot: usize,
    sample: usize,
    lod: usize,
    corner: usize,
    weight: f32,
}

impl Contribution {
    #[inline]
    fn key(&self) -> (usize, usize, usize, usize) {
        (self.slot, self.sample, self.lod, self.corner)
    }
}

fn scatter_sorted<A: Accumulator>(
    coords: &ArrayView2<f32>,
    grad_output: &ArrayView2<f32>,
    levels: &[LevelPlan],
    bitwidth: u32,
    codebook_rows: usize,
    feature_dim: usize,
    policy: PrecisionPolicy,
) -> Result<Array2<f32>> {
    let mut contributions: Vec<Contribution> = (0..coords.nrows())
        .into_par_iter()
        .flat_map_iter(|i| {
            let coord = cast_coord(coords, i, &policy);
            levels.iter().enumerate().flat_map(move |(lod, level)| {
                let (slots, weights) = level.corner_slots(coord, bitwidth);
                (0..8).map(move |k| Contribution {
                    slot: slots[k],
                    sample: i,
                    lod,
                    corner: k,
                    weight: weights[k],
                })
            })
        })
        .collect();

    // 키가 유일하므로 불안정 정렬이어도 순서가 결정적
    contributions.par_sort_unstable_by_key(Contribution::key);

    let mut runs = Vec::new();
    let mut start = 0;
    while start < contributions.len() {
        let slot = contributions[start].slot;
        let mut end = start + 1;
        while end < contributions.len() && contributions[end].slot == slot {
            end += 1;
        }
        runs.push((slot, start..end));
        start = end;
    }

    let reduced: Vec<(usize, Vec<f32>)> = runs
        .into_par_iter()
        .map(|(slot, range)| {
            let mut acc = vec![A::zero(); feature_dim];
            for c in &contributions[range] {
                let g = grad_output.slice(s![c.sample, c.lod * feature_dim..(c.lod + 1) * feature_dim]);
                let w = A::from_f32(c.weight);
                for (a, &gv) in acc.iter_mut().zip(g.iter()) {
                    *a = *a + w * A::from_f32(gv);
                }
            }
            (slot, acc.into_iter().map(A::into_f32).collect())
        })
        .collect();

    let mut grad = Array2::<f32>::zeros((codebook_rows, feature_dim));
    for (slot, values) in reduced {
        for (dst, v) in grad.row_mut(slot).iter_mut().zip(values) {
            *dst = v;
        }
    }
    Ok(grad)
}
