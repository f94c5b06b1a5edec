pub mod cidr;
pub mod client_ip;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod notes;
pub mod rate_limiter;
pub mod record;
pub mod response;
pub mod server;
pub mod store;
pub mod token_bucket;
pub mod validation;

pub use config::Config;
pub use error::{ApiError, ApiResult, StoreError};
pub use handlers::AppState;
pub use rate_limiter::{LimiterSettings, RateLimiter};
pub use record::Record;
pub use response::ApiResponse;
pub use server::create_app;
pub use store::{MemoryRecordStore, RecordStore, RedisRecordStore};
