pub mod active;
pub mod connections;
pub mod dispatcher;
pub mod events;
pub mod fanout;
pub mod meetings;
pub mod messaging;
pub mod presence;
pub mod server;
pub mod session;
