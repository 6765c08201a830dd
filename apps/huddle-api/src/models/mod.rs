pub mod attachment;
pub mod message;
pub mod user;
