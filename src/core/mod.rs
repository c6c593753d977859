pub mod builtin_personas;
pub mod chat_stream;
pub mod config;
pub mod conversation;
pub mod directives;
pub mod export;
pub mod message;
pub mod persona;
