pub mod admin;
pub mod auth;
pub mod channel_member;
pub mod guild_member;
