pub mod config;
pub mod conv;
pub mod discovery;
pub mod heartbeat;
pub mod influx;
pub mod midea;
pub mod mqtt;
pub mod retry;
pub mod sink;
