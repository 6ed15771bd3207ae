//! 가속 인코더의 혼합 정밀도 정책
//!
//! 저장은 항상 `f32`입니다. 정책은 입력을 먼저 IEEE binary16으로 반올림할지
//! (autocast 호스트가 커널에 넘기는 값과 동일), 그리고 8개 꼭짓점 가중합을 어떤 타입으로
//! 누산할지를 정합니다. 역전파의 슬롯 누산은 f32 아래로 내려가지 않습니다.

use half::f16;
use num_traits::Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accumulation {
    /// 입력 정밀도(f16일 수 있음)로 누산
    InputPrecision,
    /// 입력 정밀도와 무관하게 f64로 누산
    #[default]
    HigherPrecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrecisionPolicy {
    pub half_inputs: bool,
    pub accumulation: Accumulation,
}

impl PrecisionPolicy {
    pub fn full() -> Self {
        Self::default()
    }

    /// f16 입력 + f64 누산
    pub fn mixed() -> Self {
        Self {
            half_inputs: true,
            accumulation: Accumulation::HigherPrecision,
        }
    }

    pub fn with_accumulation(mut self, accumulation: Accumulation) -> Self {
        self.accumulation = accumulation;
        self
    }

    #[inline]
    pub fn cast_input(&self, v: f32) -> f32 {
        if self.half_inputs {
            f16::from_f32(v).to_f32()
        } else {
            v
        }
    }

    /// 역전파 슬롯 누산을 f64로 할지 여부. 아니면 f32 (저장 정밀도).
    ///
    /// 한 슬롯에 모이는 기여 수에는 상한이 없으므로 f16 누산은 쓰지 않습니다.
    #[inline]
    pub fn scatter_in_f64(&self) -> bool {
        self.accumulation == Accumulation::HigherPrecision
    }

    /// 단위 스케일 코드북에서 reference 대비 순전파 절대 허용 오차
    pub fn tolerance(&self) -> f32 {
        match (self.half_inputs, self.accumulation) {
            (false, Accumulation::HigherPrecision) => 1e-6,
            (false, Accumulation::InputPrecision) => 1e-5,
            (true, _) => 1e-2,
        }
    }
}

/// 꼭짓점 가중합의 누산 타입
pub trait Accumulator: Float + Send + Sync {
    fn from_f32(v: f32) -> Self;
    fn into_f32(self) -> f32;
}

impl Accumulator for f32 {
    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
    #[inline]
    fn into_f32(self) -> f32 {
        self
    }
}

impl Accumulator for f64 {
    #[inline]
    fn from_f32(v: f32) -> Self {
        v as f64
    }
    #[inline]
    fn into_f32(self) -> f32 {
        self as f32
    }
}

impl Accumulator for f16 {
    #[inline]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
    #[inline]
    fn into_f32(self) -> f32 {
        self.to_f32()
    }
}

/// `A` 타입으로 누산한 `sum_k weights[k] * values[k]`
#[inline]
pub fn weighted_sum<A: Accumulator>(weights: &[f32; 8], values: &[f32; 8]) -> f32 {
    let mut acc = A::zero();
    for k in 0..8 {
        acc = acc + A::from_f32(weights[k]) * A::from_f32(values[k]);
    }
    acc.into_f32()
}
