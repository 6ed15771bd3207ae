mod encoding;

use pyo3::prelude::*;
use pyo3::types::PyModule;

/// 다중 해상도 해시 그리드 인코딩
#[pymodule]
pub fn hashgrid(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    // 순전파/역전파와 코드북 레이아웃
    encoding::register(m)?;
    Ok(())
}
