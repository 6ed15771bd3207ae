pub mod hash;
pub mod precision;
pub mod trilinear;

pub use self::hash::{grid_index, segment_size, spatial_hash, GridRegime, PRIMES};
pub use self::precision::{Accumulation, PrecisionPolicy};
pub use self::trilinear::{locate, trilinear_weights, CellLocation, CORNER_OFFSETS};
