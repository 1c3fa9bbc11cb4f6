pub mod env;
pub mod http;
pub mod runner;
pub mod script;
