//! Outcome notification delivery

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE as BASE64_URL, Engine as _};
use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde_json::json;
use tracing::{info, warn};

use crate::errors::DeployError;
use crate::pipeline::{Notification, Notifier};
use crate::storage::settings::GmailSettings;

const GMAIL_SEND_SCOPE: &[&str] = &["https://www.googleapis.com/auth/gmail.send"];

/// Writes the outcome to the service log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), DeployError> {
        let recipients = notification.recipients.join(", ");
        if notification.success {
            info!(
                deployment = %notification.deployment_id,
                "{} deployed successfully in {} mode: {} (to: {})",
                notification.website_name,
                notification.mode,
                notification.url.as_deref().unwrap_or("-"),
                recipients
            );
        } else {
            warn!(
                deployment = %notification.deployment_id,
                "{} deployment failed in {} mode at step {}: {} (to: {})",
                notification.website_name,
                notification.mode,
                notification
                    .failed_step
                    .map(|step| step.as_str())
                    .unwrap_or("-"),
                notification.error.as_deref().unwrap_or("unknown error"),
                recipients
            );
        }
        Ok(())
    }
}

/// POSTs the outcome as JSON to a configured endpoint
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, DeployError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), DeployError> {
        let response = self.client.post(&self.url).json(notification).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeployError::NotificationError(format!(
                "webhook {} answered {}",
                self.url, status
            )));
        }
        info!(
            "Notification for deployment {} delivered to {}",
            notification.deployment_id, self.url
        );
        Ok(())
    }
}

/// Sends one email per run to every recipient through the Gmail API
///
/// The service account must have domain-wide delegation for the sending
/// mailbox, which only key-file credentials support.
pub struct GmailNotifier {
    client: reqwest::Client,
    token_provider: Arc<dyn TokenProvider>,
    sender: String,
    send_url: String,
}

impl GmailNotifier {
    pub fn from_settings(settings: &GmailSettings) -> Result<Self, DeployError> {
        let account = match &settings.credentials_file {
            Some(path) => CustomServiceAccount::from_file(path)?,
            None => CustomServiceAccount::from_env()?.ok_or_else(|| {
                DeployError::ConfigError(
                    "Gmail delivery needs a service account key file".to_string(),
                )
            })?,
        };
        let account = account.with_subject(settings.delegated_user.clone());
        Self::new(Arc::new(account), &settings.delegated_user, &settings.api_url)
    }

    pub fn new(
        token_provider: Arc<dyn TokenProvider>,
        sender: &str,
        api_url: &str,
    ) -> Result<Self, DeployError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            token_provider,
            sender: sender.to_string(),
            send_url: format!(
                "{}/gmail/v1/users/me/messages/send",
                api_url.trim_end_matches('/')
            ),
        })
    }
}

#[async_trait]
impl Notifier for GmailNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), DeployError> {
        if notification.recipients.is_empty() {
            warn!(
                "No recipients for deployment {}, email not sent",
                notification.deployment_id
            );
            return Ok(());
        }

        let raw = BASE64_URL.encode(render_email(&self.sender, notification));
        let token = self.token_provider.token(GMAIL_SEND_SCOPE).await?;
        let response = self
            .client
            .post(&self.send_url)
            .bearer_auth(token.as_str())
            .json(&json!({ "raw": raw }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeployError::NotificationError(format!(
                "Gmail API answered {}: {}",
                status, body
            )));
        }
        info!(
            "Notification email for deployment {} sent to {} recipient(s)",
            notification.deployment_id,
            notification.recipients.len()
        );
        Ok(())
    }
}

/// Plain-text RFC 5322 message for one run
fn render_email(sender: &str, notification: &Notification) -> String {
    let subject = match notification.success {
        true => format!(
            "[WebDeploy] {} deployed successfully ({} mode)",
            notification.website_name, notification.mode
        ),
        false => format!(
            "[WebDeploy] {} deployment failed ({} mode)",
            notification.website_name, notification.mode
        ),
    };

    let mut body = vec![
        format!("Website: {}", notification.website_name),
        format!("Mode: {}", notification.mode),
        format!("Deployment: {}", notification.deployment_id),
    ];
    if let Some(url) = &notification.url {
        body.push(format!("Live URL: {}", url));
    }
    if let Some(step) = notification.failed_step {
        body.push(format!("Failed step: {}", step));
    }
    if let Some(error) = &notification.error {
        body.push(format!("Error: {}", error));
    }
    if let Some(summary) = &notification.summary {
        body.push(String::new());
        body.push(summary.clone());
    }

    let headers = [
        format!("From: {}", sender),
        format!("To: {}", notification.recipients.join(", ")),
        format!("Subject: {}", subject),
        "MIME-Version: 1.0".to_string(),
        "Content-Type: text/plain; charset=\"UTF-8\"".to_string(),
    ];
    format!("{}\r\n\r\n{}\r\n", headers.join("\r\n"), body.join("\r\n"))
}
