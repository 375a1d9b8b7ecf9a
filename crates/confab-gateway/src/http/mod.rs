pub mod admin;
pub mod auth;
pub mod chat;
pub mod conversations;
pub mod files;
pub mod groups;
pub mod health;
pub mod settings;
pub mod user_groups;
pub mod users;
