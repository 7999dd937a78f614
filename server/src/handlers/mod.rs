//! HTTP request handlers.

pub mod health;
pub mod publish;
pub mod subscribe;

pub use health::{health, metrics, ready};
pub use publish::publish;
pub use subscribe::subscribe;
