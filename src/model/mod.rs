//! Model query capability.
//!
//! - [`HttpModelClient`]: the production [`crate::traits::ModelClient`]
//! - [`extract_json`] / [`parse_response`]: pulling JSON out of model text

mod client;
mod response;

pub use client::HttpModelClient;
pub use response::{extract_json, parse_response, InvalidResponse};
