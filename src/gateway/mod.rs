pub mod auth;
pub mod broker;
pub mod chain;
pub mod clob;
