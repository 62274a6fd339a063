pub mod cu;
pub mod fee;

pub use cu::*;
pub use fee::*;
