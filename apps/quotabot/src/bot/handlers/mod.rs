pub mod admin;
pub mod command;
pub mod render;
