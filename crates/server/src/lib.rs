//! HTTP layer for the Holderscope service.
//!
//! - [`router`]: route table and shared application state
//! - [`handlers`]: the holders/progress endpoint handlers and the canonical
//!   `{error, details?}` error shape

pub mod handlers;
pub mod router;
