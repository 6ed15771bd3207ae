use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub mod consistency_test;
pub mod end_to_end_test;

/// `[-scale, scale]` 균등분포 행렬 (시드 고정)
pub(crate) fn uniform(rows: usize, cols: usize, scale: f32, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::random_using((rows, cols), Uniform::new_inclusive(-scale, scale), &mut rng)
}

/// 정점 좌표 `v` (정수)를 해상도 `res` 격자의 정규화 좌표로
pub(crate) fn vertex_coord(v: [u32; 3], res: u32) -> [f32; 3] {
    let to_unit = |c: u32| 2.0 * c as f32 / res as f32 - 1.0;
    [to_unit(v[0]), to_unit(v[1]), to_unit(v[2])]
}
