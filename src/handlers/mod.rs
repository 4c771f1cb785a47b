pub mod carts;
pub mod common;
pub mod orders;
pub mod products;
