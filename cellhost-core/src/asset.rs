//! Asset publishing boundary
//!
//! Apps that need to hand the client a large binary (an image, an archive)
//! publish it out of band and stream only the returned URI.

use crate::error::{HostError, Result};

pub trait AssetPublisher: Send + Sync {
    /// Publish `data` and return a URI the client can fetch it from
    fn publish_asset(&self, media_type: &str, data: &[u8]) -> Result<String>;
}

/// Publisher for hosts that have nowhere to put assets
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAssetPublisher;

impl AssetPublisher for NoAssetPublisher {
    fn publish_asset(&self, media_type: &str, _data: &[u8]) -> Result<String> {
        Err(HostError::InvalidRequest(format!(
            "no asset publisher configured for {media_type}"
        )))
    }
}
