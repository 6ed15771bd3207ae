//! 다중 해상도 해시 그리드 위치 인코딩
//!
//! 3D 좌표를 레벨별 코드북의 삼선형 보간 피처로 바꾸는 순전파와, 코드북에 대한
//! 그래디언트를 누산하는 역전파를 제공합니다.

pub mod error;
pub mod layers;
pub mod ops;

#[cfg(feature = "python")]
mod bindings;

pub use error::{HashGridError, Result};
pub use layers::hashgrid::{
    hashgrid_interpolate, hashgrid_interpolate_backward, hashgrid_naive, hashgrid_naive_backward,
    CodebookLayout, HashGrid, HashGridConfig, HashGridContext, HashGridGrads, HashGridInterpolate,
    ScatterStrategy,
};
pub use ops::precision::{Accumulation, PrecisionPolicy};
