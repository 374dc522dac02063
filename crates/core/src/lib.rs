pub mod api_url;
pub mod client;
pub mod config;
pub mod controller;
pub mod listen_feed;
pub mod params;
pub mod session;
pub mod subscription;
