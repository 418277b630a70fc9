pub mod client;
pub mod http;
pub mod json;
pub mod ntp;
pub mod server;
