//! HTTP Engine (component H): orchestrates the Cache Strategy, File Cache
//! and Connection Pool into the public `execute()` entry point.

pub mod body;
pub mod engine;
pub mod redirect;

pub use body::{RequestBody, ResponseBody};
pub use engine::{Execution, HttpEngine, HttpEngineOptions, RequestContext};
pub use redirect::get_retry_request;
