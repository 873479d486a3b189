//! HTTP classification service backend

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{Error, Result};

use super::{Classification, ClassificationRequest, ClassifierBackend};

/// Classification service over HTTP
#[derive(Clone)]
pub struct HttpClassifier {
    client: Client,
    host: String,
}

impl HttpClassifier {
    pub fn new(host: &str) -> Self {
        Self {
            client: Client::new(),
            host: host.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ClassifierBackend for HttpClassifier {
    async fn classify(&self, request: &ClassificationRequest) -> Result<Classification> {
        let url = format!("{}/v1/classify", self.host);
        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "classifier returned {}",
                response.status()
            )));
        }

        let classification: Classification = response.json().await?;
        debug!(
            category = %classification.category,
            confidence = classification.confidence,
            "Classifier verdict"
        );
        Ok(classification)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.host);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
