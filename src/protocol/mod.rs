pub mod chat;
pub mod deepgram;
pub mod packets;
