//! Outbound Messaging Capability
//!
//! The engine never speaks SMTP or carrier protocols itself; it posts send
//! requests to a configured gateway webhook and normalizes the outcome.
//! The capability is only consulted for customers opted into the channel —
//! opt-in checks happen in campaign execution, not here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Delivery channel enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

/// Outcome of a single send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn ok(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Messaging capability trait
///
/// Transport failures come back inside the outcome, not as an `Err`; the
/// campaign's per-customer failure accounting depends on that shape.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> SendOutcome;
}

/// Messenger that posts sends to a gateway webhook
pub struct WebhookMessenger {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookMessenger {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Messenger for WebhookMessenger {
    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> SendOutcome {
        let payload = json!({
            "channel": channel.as_str(),
            "recipient": recipient,
            "subject": subject,
            "body": body,
        });

        let response = match self.client.post(&self.endpoint).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => return SendOutcome::failure(format!("gateway unreachable: {}", e)),
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return SendOutcome::failure(format!("gateway error ({}): {}", status, text));
        }

        match response.json::<serde_json::Value>().await {
            Ok(data) => {
                let success = data
                    .get("success")
                    .and_then(|s| s.as_bool())
                    .unwrap_or(true);
                if success {
                    let message_id = data
                        .get("message_id")
                        .and_then(|m| m.as_str())
                        .map(String::from)
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    SendOutcome::ok(message_id)
                } else {
                    let error = data
                        .get("error")
                        .and_then(|e| e.as_str())
                        .unwrap_or("rejected by gateway");
                    SendOutcome::failure(error)
                }
            }
            Err(e) => SendOutcome::failure(format!("unparsable gateway response: {}", e)),
        }
    }
}

/// Messenger for local runs with no gateway configured: logs every send
/// and reports success.
pub struct DryRunMessenger;

#[async_trait]
impl Messenger for DryRunMessenger {
    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> SendOutcome {
        tracing::info!(
            "[dry-run] {} -> {} subject={:?} body={} chars",
            channel.as_str(),
            recipient,
            subject,
            body.len()
        );
        SendOutcome::ok(format!("dry-run-{}", uuid::Uuid::new_v4()))
    }
}
