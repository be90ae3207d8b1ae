// camfeed-api: Async HTTP transport for camera-recording (NVR) backends

pub mod auth;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod transport;

pub use auth::{AuthScheme, Credentials};
pub use client::{ClipDownload, MediaClient, ProbeMethod, ProbeResponse, StillImage};
pub use endpoints::{Endpoints, HlsEncoding, QualityTier, TransportKind};
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};
