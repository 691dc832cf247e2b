pub mod dto;
pub mod frame_cache;
pub mod imaging;
pub mod ingestion;
pub mod multiplexer;
pub mod ports;
pub mod registry;
pub mod services;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;
