pub mod connection;
pub mod dispatcher;
pub mod presence;

pub use connection::CommandHandler;
pub use dispatcher::{Delivery, Dispatcher, EventChannel};
pub use presence::{ConnectionId, InMemoryPresence, PresenceRegistry};
