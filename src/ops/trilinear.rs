use ndarray::ArrayView1;

/// 상단 경계가 범위 밖 셀로 반올림되지 않도록 하는 여유값
pub const BOUNDARY_EPS: f32 = 1e-5;

/// 단위 정육면체 꼭짓점 오프셋. 비트 순서는 x가 최상위 (000, 001, ..., 111).
/// `trilinear_weights`의 가중치 순서와 1:1로 대응해야 합니다.
pub const CORNER_OFFSETS: [[u32; 3]; 8] = [
    [0, 0, 0],
    [0, 0, 1],
    [0, 1, 0],
    [0, 1, 1],
    [1, 0, 0],
    [1, 0, 1],
    [1, 1, 0],
    [1, 1, 1],
];

/// 한 레벨에서 좌표가 속한 셀
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellLocation {
    /// 기준 꼭짓점 c000
    pub base: [u32; 3],
    /// 셀 내부 분수 오프셋, 각 성분 [0, 1]
    pub frac: [f32; 3],
}

impl CellLocation {
    /// 8개 꼭짓점의 정수 좌표
    #[inline]
    pub fn corners(&self) -> [[u32; 3]; 8] {
        let mut out = [[0u32; 3]; 8];
        for (k, offset) in CORNER_OFFSETS.iter().enumerate() {
            out[k] = [
                self.base[0] + offset[0],
                self.base[1] + offset[1],
                self.base[2] + offset[2],
            ];
        }
        out
    }

    #[inline]
    pub fn weights(&self) -> [f32; 8] {
        trilinear_weights(self.frac)
    }
}

/// 정규화 좌표 [-1, 1] → [0, res) 변환 후 셀 탐색.
///
/// 범위 밖 좌표는 거부하지 않고 클리핑합니다. 기준 꼭짓점은 `res - 2`로도 제한하여
/// 큰 해상도에서 f32 반올림이 발생해도 +1 꼭짓점이 격자 밖으로 나가지 않게 합니다.
#[inline]
pub fn locate(coord: [f32; 3], res: u32) -> CellLocation {
    let res_f = res as f32;
    let upper = res_f - 1.0 - BOUNDARY_EPS;
    let max_base = res.saturating_sub(2);

    let mut base = [0u32; 3];
    let mut frac = [0f32; 3];
    for axis in 0..3 {
        // f32::max는 NaN 대신 0.0을 돌려줌
        let t = (((coord[axis] + 1.0) / 2.0) * res_f).max(0.0).min(upper);
        let c = (t.floor() as u32).min(max_base);
        base[axis] = c;
        frac[axis] = t - c as f32;
    }
    CellLocation { base, frac }
}

#[inline]
pub fn locate_row(row: ArrayView1<f32>, res: u32) -> CellLocation {
    locate([row[0], row[1], row[2]], res)
}

/// 좌표 성분 중 [-1, 1]을 벗어난 것이 있는지
#[inline]
pub fn is_out_of_domain(row: ArrayView1<f32>) -> bool {
    row.iter().any(|&v| !(-1.0..=1.0).contains(&v))
}

/// 삼선형 보간 가중치
#[inline]
pub fn trilinear_weights(x: [f32; 3]) -> [f32; 8] {
    let [xa, xb, xc] = x;
    let (_xa, _xb, _xc) = (1.0 - xa, 1.0 - xb, 1.0 - xc);
    [
        _xa * _xb * _xc,
        _xa * _xb * xc,
        _xa * xb * _xc,
        _xa * xb * xc,
        xa * _xb * _xc,
        xa * _xb * xc,
        xa * xb * _xc,
        xa * xb * xc,
    ]
}
