pub mod error;
pub mod model;

pub use error::AttemptError;
pub use model::{Outcome, Target};
