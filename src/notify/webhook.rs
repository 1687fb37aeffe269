//! Webhook delivery

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use sha2::Sha256;
use std::time::Duration;

use super::{Channel, Notifier, WinnerNotification};

pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Base64 HMAC-SHA256 of a request body
pub fn sign_body(secret: &[u8], body: &[u8]) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret).context("Failed to initialize HMAC")?;
    mac.update(body);
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    secret: Option<Vec<u8>>,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration, secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            secret: secret.map(String::into_bytes),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, channel: &Channel, notification: &WinnerNotification) -> Result<()> {
        let Channel::Webhook { url } = channel;
        let body = serde_json::to_vec(notification)?;

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_body(secret, &body)?);
        }

        let response = request
            .body(body)
            .send()
            .await
            .with_context(|| format!("Webhook request to {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Webhook {} answered {}", url, status);
        }
        Ok(())
    }
}
