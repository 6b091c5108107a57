pub mod coordinator;
pub mod error;
pub mod notify;
pub mod policy;

pub use coordinator::DeliveryCoordinator;
pub use error::{DeliveryError, PolicyViolation};
