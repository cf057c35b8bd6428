//! Power BI embed-token exchange (client-credentials flow).

use crate::config::PowerBiConfig;
use crate::error::PowerBiError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

const POWER_BI_SCOPE: &str = "https://analysis.windows.net/powerbi/api/.default";

/// What a browser needs to render the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedToken {
    pub token: String,
    pub embed_url: String,
    pub report_id: String,
    pub expires: String,
}

pub struct PowerBiClient {
    client: Client,
    config: PowerBiConfig,
}

impl PowerBiClient {
    pub fn new(config: PowerBiConfig) -> Result<Self, PowerBiError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, config })
    }

    pub fn report_id(&self) -> &str {
        &self.config.report_id
    }

    pub fn access_token(&self) -> Result<String, PowerBiError> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.authority_host.trim_end_matches('/'),
            self.config.tenant_id
        );
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", POWER_BI_SCOPE),
            ])
            .send()?;
        let body: Value = response
            .json()
            .map_err(|e| PowerBiError::Token(format!("invalid token response: {}", e)))?;
        match body.get("access_token").and_then(Value::as_str) {
            Some(token) => Ok(token.to_string()),
            None => {
                let reason = body
                    .get("error_description")
                    .or_else(|| body.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("no access_token in response");
                warn!("Power BI token request failed: {}", reason);
                Err(PowerBiError::Token(reason.to_string()))
            }
        }
    }

    /// Fetch report metadata and a view-only embed token for it.
    pub fn embed_token(&self) -> Result<EmbedToken, PowerBiError> {
        let access_token = self.access_token()?;
        let report_url = format!(
            "{}/groups/{}/reports/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.workspace_id,
            self.config.report_id
        );

        let report = self.client.get(&report_url).bearer_auth(&access_token).send()?;
        if !report.status().is_success() {
            return Err(PowerBiError::Report(report.text().unwrap_or_default()));
        }
        let report: Value = report
            .json()
            .map_err(|e| PowerBiError::Report(e.to_string()))?;
        let embed_url = report
            .get("embedUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| PowerBiError::Report("no embedUrl in report".to_string()))?
            .to_string();

        let generated = self
            .client
            .post(format!("{}/GenerateToken", report_url))
            .bearer_auth(&access_token)
            .json(&json!({"accessLevel": "View", "allowSaveAs": false}))
            .send()?;
        if !generated.status().is_success() {
            return Err(PowerBiError::EmbedToken(generated.text().unwrap_or_default()));
        }
        let generated: Value = generated
            .json()
            .map_err(|e| PowerBiError::EmbedToken(e.to_string()))?;
        let field = |key: &str| {
            generated
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| PowerBiError::EmbedToken(format!("no {} in response", key)))
        };

        Ok(EmbedToken {
            token: field("token")?,
            embed_url,
            report_id: self.config.report_id.clone(),
            expires: field("expiration")?,
        })
    }
}
