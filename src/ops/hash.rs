//! 그리드 정점 좌표 → 코드북 슬롯 매핑
//!
//! 정점 수가 코드북 용량 이하이면 충돌 없는 선형 인덱스(dense), 그보다 크면
//! 공간 해시(hashed)를 사용합니다. 해시 영역에서는 충돌이 의도적으로 허용됩니다.

/// Teschner 스타일 공간 해시 상수. 버전이 고정된 테이블이므로 변경 금지.
pub const PRIMES: [u64; 3] = [1, 2_654_435_761, 805_459_861];

pub const MAX_BITWIDTH: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridRegime {
    /// `res^3 <= 2^bitwidth`: 전체 격자가 코드북에 들어감
    Dense,
    /// `res^3 > 2^bitwidth`: 해시로 코드북에 접어 넣음
    Hashed,
}

impl GridRegime {
    /// 레짐 판정. reference/가속 경로가 모두 이 함수만 사용합니다.
    /// 경계 `res^3 == 2^bitwidth`는 dense.
    #[inline]
    pub fn select(res: u32, bitwidth: u32) -> Self {
        if num_vertices(res) > codebook_capacity(bitwidth) {
            GridRegime::Hashed
        } else {
            GridRegime::Dense
        }
    }
}

#[inline]
pub fn num_vertices(res: u32) -> u64 {
    let r = res as u64;
    r.saturating_mul(r).saturating_mul(r)
}

#[inline]
pub fn codebook_capacity(bitwidth: u32) -> u64 {
    1u64 << bitwidth
}

/// 레벨 하나의 코드북 세그먼트 크기: `min(res^3, 2^bitwidth)`
#[inline]
pub fn segment_size(res: u32, bitwidth: u32) -> usize {
    num_vertices(res).min(codebook_capacity(bitwidth)) as usize
}

/// 공간 해시. 결과는 항상 `[0, 2^bitwidth)`.
///
/// u64 wrapping 곱 후 하위 비트 마스킹은 `bitwidth <= 32`에서 정수 modulo와 동일합니다.
#[inline]
pub fn spatial_hash(cx: u32, cy: u32, cz: u32, bitwidth: u32) -> usize {
    let h = (cx as u64).wrapping_mul(PRIMES[0])
        ^ (cy as u64).wrapping_mul(PRIMES[1])
        ^ (cz as u64).wrapping_mul(PRIMES[2]);
    (h & (codebook_capacity(bitwidth) - 1)) as usize
}

/// 충돌 없는 선형 인덱스 `cx + cy*res + cz*res*res`
#[inline]
pub fn dense_index(cx: u32, cy: u32, cz: u32, res: u32) -> usize {
    let r = res as usize;
    cx as usize + cy as usize * r + cz as usize * r * r
}

/// 레벨 내 슬롯 (세그먼트 시작 오프셋은 더하지 않음)
#[inline]
pub fn grid_index(corner: [u32; 3], res: u32, bitwidth: u32, regime: GridRegime) -> usize {
    let [cx, cy, cz] = corner;
    match regime {
        GridRegime::Dense => dense_index(cx, cy, cz, res),
        GridRegime::Hashed => spatial_hash(cx, cy, cz, bitwidth),
    }
}
