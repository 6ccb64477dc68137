pub mod health;
pub mod messages;
pub mod moderation;
pub mod rooms;
pub mod users;
