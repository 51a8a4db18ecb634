pub mod errors;
pub mod events;
pub mod identity;
pub mod ids;
pub mod notification;
pub mod rooms;
pub mod whisper;
