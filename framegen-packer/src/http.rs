use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{Packer, PackerError, PackingRequest, PackingResult};

/// Posts the normalized request to a packing service endpoint.
pub struct HttpPacker {
    client: reqwest::Client,
    url: String,
}

impl HttpPacker {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Packer for HttpPacker {
    async fn pack(&self, request: &PackingRequest<'_>) -> Result<PackingResult, PackerError> {
        debug!(url = %self.url, uid = request.uid, "sending frame request to packer");
        let resp = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| PackerError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            warn!(status = resp.status().as_u16(), "packer rejected request");
            return Err(PackerError::Status(resp.status().as_u16()));
        }

        let body = resp.text().await.map_err(|e| PackerError::Http(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| PackerError::Decode(e.to_string()))
    }
}
