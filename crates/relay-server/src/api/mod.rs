//! REST endpoints used by the browser side and by plain HTTP callers.

pub mod manifest;
pub mod requests;
pub mod sessions;
pub mod stream;
