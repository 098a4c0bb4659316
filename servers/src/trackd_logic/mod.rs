pub mod config;
pub mod state;
pub mod udp;
pub mod http;
pub mod worker_process;
pub mod master;
pub mod signals;
