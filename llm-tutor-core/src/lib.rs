pub mod classifier;
pub mod domain;
pub mod error;
pub mod traits;

pub use classifier::*;
pub use domain::*;
pub use error::*;
pub use traits::*;
