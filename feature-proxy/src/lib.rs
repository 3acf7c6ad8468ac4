//! HTTP front of the feature fetcher: dataset routing, response shaping and
//! the admin listener.

pub mod config;
pub mod errors;
pub mod metrics_defs;
pub mod response;
pub mod service;

use errors::ProxyError;
use service::FeatureProxyService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;

pub async fn run(config: config::Config) -> Result<(), ProxyError> {
    let proxy_service = FeatureProxyService::new(&config)?;
    let admin_service = AdminService::<_, ProxyError>::new(|| true);

    let proxy_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        proxy_service,
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(proxy_task, admin_task)?;
    Ok(())
}
