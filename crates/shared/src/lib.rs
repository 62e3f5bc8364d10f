pub mod api;
pub mod constants;
pub mod error;
pub mod ids;
pub mod permissions;
