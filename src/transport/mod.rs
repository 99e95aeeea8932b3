pub mod client;
pub mod messages;

pub use client::{TransportEvent, TransportSender, TransportSession};
pub use messages::{decode_server_message, ActivitySpeaker, ContentPart, ServerEvent, SetupMessage};
