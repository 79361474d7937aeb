pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod service;
mod stream;
pub mod upstream_client;

pub use auth::{AuthError, CustomKeyAuth};
pub use bootstrap::{Bootstrap, CliArgs, bootstrap, load_config};
pub use error::GatewayError;
pub use service::{GatewayService, GatewayStats};
pub use upstream_client::{
    ReqwestUpstreamClient, UpstreamClientBuildError, UpstreamClientConfig, WreqUpstreamClient,
    build_upstream_client,
};
