mod channel;
mod codec;
pub mod config;
mod conn;
mod demux;
pub mod error;
pub mod gateway;
mod manager;
mod negotiator;
mod packet;
mod publisher;
mod puller;
mod push;
mod service;

#[cfg(feature = "monitor")]
pub mod http_service;
