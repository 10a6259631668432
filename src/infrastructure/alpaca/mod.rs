mod client;
mod registry;
mod wire;

pub use client::AlpacaBrokerClient;
pub use registry::AlpacaBrokerRegistry;
