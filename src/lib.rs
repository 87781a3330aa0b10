pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod indexer;
pub mod processing {
    pub mod downscale;
}
pub mod selection;
pub mod tasks {
    pub mod session;
}
