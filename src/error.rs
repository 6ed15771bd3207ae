//! 해시 그리드 연산의 공통 에러 타입
//!
//! 모든 검증은 진입 시점에 한 번만 수행되며, 에러가 발생하면 부분 결과 없이 즉시 반환합니다.

#[cfg(feature = "python")]
use pyo3::exceptions::PyValueError;
#[cfg(feature = "python")]
use pyo3::prelude::*;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HashGridError {
    /// 잘못된 설정값 (홀수 피처 차원, 범위를 벗어난 bitwidth 등)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 입력 텐서/메타데이터의 형태 불일치
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
}

impl HashGridError {
    pub fn configuration<T: ToString>(msg: T) -> Self {
        HashGridError::Configuration(msg.to_string())
    }

    pub fn shape<T: ToString>(msg: T) -> Self {
        HashGridError::ShapeMismatch(msg.to_string())
    }
}

#[cfg(feature = "python")]
impl From<HashGridError> for PyErr {
    fn from(err: HashGridError) -> Self {
        PyValueError::new_err(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HashGridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_category() {
        let err = HashGridError::configuration("feature dim 3 is odd");
        assert_eq!(err.to_string(), "Configuration error: feature dim 3 is odd");

        let err = HashGridError::shape("coords must be [N, 3]");
        assert!(matches!(err, HashGridError::ShapeMismatch(_)));
    }
}
