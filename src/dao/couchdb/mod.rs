//! Remote-document backend over the CouchDB HTTP API.

mod changes;
mod client;
mod config;
mod error;
mod models;
mod presence_channel;
mod room_store;
mod state_store;

pub use client::CouchClient;
pub use config::CouchConfig;
pub use error::{CouchDaoError, CouchResult};
pub use presence_channel::CouchPresenceChannel;
pub use room_store::CouchRoomStore;
pub use state_store::CouchStateStore;
