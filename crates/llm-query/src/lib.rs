pub mod catalog;
pub mod context;
pub mod conversation;
pub mod errors;
pub mod models;
pub mod providers;
pub mod secrets;
pub mod settings;
pub mod stream;
