//! Classifier oracle client.
//!
//! Treats the external calibrated model as a pure function
//! `features -> probability + uncertainty`. Any failure — unreachable,
//! timeout, malformed body — degrades to `None`; the verdict assembler
//! proceeds without ML input. This client never touches the Security Report.

use sentinel_core::error::ClassifierError;
use sentinel_core::types::{FeatureVector, MlAnalysis};
use std::time::Duration;

/// Per-call cap for the classifier oracle.
pub const CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ClassifierClient {
    endpoint: String,
    client: reqwest::Client,
}

impl ClassifierClient {
    /// `endpoint` is the full analyze URL, e.g. `http://127.0.0.1:8300/analyze`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CLASSIFIER_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    /// Scores a feature vector, or `None` when the oracle is unusable.
    pub async fn score(&self, features: &FeatureVector) -> Option<MlAnalysis> {
        match self.try_score(features).await {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                tracing::warn!(error = %e, "classifier unavailable, proceeding without ML");
                None
            }
        }
    }

    async fn try_score(&self, features: &FeatureVector) -> Result<MlAnalysis, ClassifierError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(features)
            .send()
            .await
            .map_err(|e| ClassifierError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClassifierError::Unavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let analysis: MlAnalysis = response
            .json()
            .await
            .map_err(|e| ClassifierError::Malformed(e.to_string()))?;

        if !(0.0..=1.0).contains(&analysis.scam_probability)
            || !analysis.scam_probability.is_finite()
        {
            return Err(ClassifierError::Malformed(format!(
                "scam_probability out of range: {}",
                analysis.scam_probability
            )));
        }

        Ok(analysis)
    }
}
