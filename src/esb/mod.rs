mod client;
mod pacing;
mod pages;
mod usage_csv;

pub use client::Client;
