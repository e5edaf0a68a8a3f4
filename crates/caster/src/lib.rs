pub mod caster;
pub mod config;
pub mod didl;
pub mod discovery;
pub mod media;
pub mod net;
pub mod profiles;
pub mod server;
pub mod session;
pub mod soap;

pub use caster::Caster;
pub use config::*;
pub use discovery::Discovery;
pub use server::{PublishedMedia, StreamServer};
pub use session::PlaybackSession;
pub use soap::SoapClient;

pub use dlna_caster_core::*;
