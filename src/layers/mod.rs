pub mod hashgrid;

pub use self::hashgrid::{HashGrid, HashGridConfig};
