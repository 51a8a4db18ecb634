pub mod gateway;
pub mod handlers;
pub mod hub;
pub mod presence;
pub mod router;
pub mod rpc;
pub mod server;

pub use hub::RoomHub;
pub use presence::PresenceRegistry;
pub use router::WhisperRouter;
pub use server::{start, ServerConfig, ServerError, ServerHandle};
