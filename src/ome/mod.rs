pub mod balance_pusher;
pub mod engine;
pub mod flusher;
pub mod ticket_puller;

pub use engine::{OmeEngine, OmeMsg};
