pub mod canonical;
pub mod codec;
pub mod config;
pub mod error;
pub mod gateway;
pub mod provider;
pub mod providers;
pub mod ratelimit;
pub mod responses;
pub mod routing;
pub mod server;
pub mod store;
pub mod stream;
pub mod taxonomy;

pub use canonical::{ApiFormat, CanonicalEvent, CanonicalRequest, CanonicalResponse};
pub use codec::CodecRegistry;
pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use provider::{ModelInfo, Provider, ProviderRegistry, ProviderStream};
pub use routing::ModelRouter;
pub use server::{build_router, AppState};
pub use store::{MemoryStore, Store};
pub use taxonomy::{ApiError, ErrorKind};
