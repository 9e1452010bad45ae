// wsjt2hamclock library
// Re-export modules for use in main.rs

pub mod config;
pub mod display;
pub mod hamclock;
pub mod monitor;
pub mod qrz;
pub mod tracker;
pub mod udp;
