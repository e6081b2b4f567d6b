//! Bootstrap: pick the backend address, bind it, and check the instance is healthy.
//!
//! A healthy address is remembered under `pgpt-url`; an unhealthy one is forgotten so the
//! next start asks again.

use crate::error::ClientError;
use crate::registry::{BackendHandle, ClientRegistry};
use crate::storage::{self, keys, KvStore};

/// Address suggested when none is configured.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8001";

/// Connect to `address`, or to the remembered address when none is given.
pub async fn connect(
    registry: &ClientRegistry,
    kv: &dyn KvStore,
    address: Option<&str>,
) -> Result<BackendHandle, ClientError> {
    let address = match address.map(str::trim).filter(|a| !a.is_empty()) {
        Some(a) => a.to_string(),
        None => storage::load::<String>(kv, keys::BACKEND_URL)
            .await?
            .filter(|a| !a.trim().is_empty())
            .ok_or(ClientError::UnconfiguredClient)?,
    };
    let handle = registry.resolve(Some(&address)).await?;
    match handle.health().await {
        Ok(health) if health.is_ok() => {
            storage::save(kv, keys::BACKEND_URL, &address).await?;
            log::info!("privategpt at {} is healthy", address);
            Ok(handle)
        }
        Ok(health) => {
            log::warn!("privategpt at {} reported status {}", address, health.status);
            kv.delete(keys::BACKEND_URL).await?;
            Err(ClientError::Unhealthy(address))
        }
        Err(e) => {
            log::warn!("health check against {} failed: {}", address, e);
            kv.delete(keys::BACKEND_URL).await?;
            Err(ClientError::Unhealthy(address))
        }
    }
}
