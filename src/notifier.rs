//! Renders the daily report and posts it to the chat webhook

use crate::config::{BusinessHours, Config};
use crate::deploys::{Stats, TOP_USERS, User};
use crate::errors::{NotifierError, Result};
use chrono::FixedOffset;
use reqwest::{Client, Response, header};
use serde::Serialize;
use std::fmt::Write;
use std::time::Duration;
use tracing::{debug, error, info};

/// Timestamp layout of off-hours deploys, e.g. `01 May 22:15 +07:00`
const TIME_HUMAN: &str = "%d %b %H:%M %:z";

/// JSON body accepted by Slack-compatible incoming webhooks
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebhookPayload {
    pub channel: String,
    pub text: String,
    pub username: String,
    pub mrkdwn: bool,
}

/// Fixed message layout for the daily report
#[derive(Debug, Clone, Copy)]
pub struct MessageTemplate {
    utc_offset: FixedOffset,
    business_hours: BusinessHours,
}

impl MessageTemplate {
    pub fn new(utc_offset: FixedOffset, business_hours: BusinessHours) -> Self {
        Self {
            utc_offset,
            business_hours,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.utc_offset, config.business_hours)
    }

    pub fn render(&self, stats: &Stats) -> String {
        let mut text = String::new();

        // Writing into a String cannot fail
        let _ = writeln!(text, "Yesterday (*{}*) deploys:", stats.date.format("%Y-%m-%d"));
        let _ = writeln!(text, "*{}* total", stats.total);
        let _ = writeln!(text, "*{}* production", stats.production.total);
        let _ = writeln!(text, "*{}* development", stats.development.total);
        text.push('\n');

        push_top_users(&mut text, "production", &stats.production.users);
        push_top_users(&mut text, "development", &stats.development.users);

        if !stats.production.after_work.is_empty() || stats.off_hours_incomplete {
            let _ = writeln!(
                text,
                "*Production deploys outside business hours ({}-{}):*",
                self.business_hours.start.format("%H:%M"),
                self.business_hours.end.format("%H:%M")
            );
            for deploy in &stats.production.after_work {
                let _ = writeln!(
                    text,
                    "{} {} to datacenter {}",
                    deploy.timestamp.with_timezone(&self.utc_offset).format(TIME_HUMAN),
                    deploy.user,
                    deploy.datacenter
                );
            }
            if stats.off_hours_incomplete {
                text.push_str("_incomplete: some off-hours deploys could not be fetched_\n");
            }
        }

        text
    }
}

fn push_top_users(text: &mut String, environment: &str, users: &[User]) {
    if users.is_empty() {
        return;
    }

    let _ = writeln!(text, "*Top {} users deploying to {}:*", TOP_USERS, environment);
    for user in users {
        let _ = writeln!(text, "{} *{}*", user.name, user.count);
    }
    text.push('\n');
}

/// Single-attempt delivery of the report to a webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
    template: MessageTemplate,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String, http_timeout: Duration, template: MessageTemplate) -> Result<Self> {
        let client = Client::builder()
            .timeout(http_timeout)
            .user_agent(format!("deploy_notifier/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(NotifierError::Http)?;

        Ok(Self {
            client,
            webhook_url,
            template,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.webhook_url.clone(),
            config.http_timeout,
            MessageTemplate::from_config(config),
        )
    }

    /// Build the webhook payload for `stats`
    pub fn payload(&self, stats: &Stats, channel: &str, sender: &str) -> WebhookPayload {
        WebhookPayload {
            channel: channel.to_string(),
            text: self.template.render(stats),
            username: sender.to_string(),
            mrkdwn: true,
        }
    }

    /// Render `stats` and post it to `channel` as `sender`
    pub async fn notify(&self, stats: &Stats, channel: &str, sender: &str) -> Result<()> {
        let payload = self.payload(stats, channel, sender);
        self.send(&payload).await
    }

    /// Post a prepared payload once
    pub async fn send(&self, payload: &WebhookPayload) -> Result<()> {
        let body = serde_json::to_vec(payload)?;

        debug!(
            "Posting report ({} bytes) to channel {}",
            body.len(),
            payload.channel
        );

        let response = self
            .client
            .post(&self.webhook_url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| NotifierError::Delivery(format!("request failed: {}", e)))?;

        self.handle_response(response, &payload.channel).await
    }

    async fn handle_response(&self, response: Response, channel: &str) -> Result<()> {
        let status = response.status();

        if status.is_success() {
            info!("Report delivered to channel {}", channel);
            return Ok(());
        }

        let error_body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());

        let error_message = match status.as_u16() {
            400 => format!("Bad request for channel {}: {}", channel, error_body),
            403 => format!("Forbidden for channel {}: {}", channel, error_body),
            404 => format!("Webhook not found for channel {}: {}", channel, error_body),
            410 => format!("Channel {} archived or webhook revoked: {}", channel, error_body),
            429 => format!("Rate limited for channel {}: {}", channel, error_body),
            500..=599 => format!("Webhook server error for channel {}: {}", channel, error_body),
            _ => format!("Unexpected response {} for channel {}: {}", status, channel, error_body),
        };

        error!("{}", error_message);
        Err(NotifierError::Delivery(error_message))
    }
}
