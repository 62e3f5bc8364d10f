pub mod admin;
pub mod channels;
pub mod files;
pub mod guilds;
pub mod members;
pub mod messages;
pub mod roles;
pub mod server;
pub mod ws;
