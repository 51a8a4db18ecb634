pub mod digest;
pub mod disclosure;
pub mod error;
pub mod notify;
pub mod push;

pub use digest::{DigestStats, LikeDigest, DIGEST_INTERVAL};
pub use disclosure::{DisclosureEngine, GuessOutcome};
pub use error::EngineError;
pub use notify::Notifier;
pub use push::{HttpPushGateway, PushError, PushGateway, PushMessage};
