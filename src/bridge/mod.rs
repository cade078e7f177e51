pub mod contacts;
pub mod gateway;
pub mod messages;
