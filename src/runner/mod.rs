pub mod dispatcher;
pub mod worker;

pub use worker::{Worker, WorkerOptions};
