pub mod cfg;
pub mod client;
pub mod contracts;
pub mod error;
pub mod event;
pub mod node;
pub mod notify;
pub mod proposal;
pub mod submit;
pub mod sync;
#[cfg(any(test, feature = "test_util"))]
pub mod test_util;
