pub mod connection;
pub mod events;
pub mod state;

pub use state::{Outbound, RoomKey, WsState};
