pub mod action;
pub mod store;
