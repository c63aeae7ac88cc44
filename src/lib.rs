pub mod osc;
pub mod shared;
