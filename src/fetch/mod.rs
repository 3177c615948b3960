pub mod client;

pub use client::{FetchClient, FetchError, FetchResponse};
