pub mod cache;
pub mod token;

pub use cache::{CacheError, CacheStore, MemoryCacheStore, SessionCache, SESSION_TTL};
pub use token::{issue_token, Claims, TokenVerifier};
