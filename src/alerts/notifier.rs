use crate::error::AlertError;
use crate::events::{Severity, Timestamp};
use log::{debug, error, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Maximum number of characters of the error log placed in a card
pub const MAX_LOG_CHARS: usize = 3000;

/// Suffix appended to an error log that was cut at `MAX_LOG_CHARS`
pub const TRUNCATION_SUFFIX: &str = "\n... (log truncated)";

/// Everything a notification needs to describe one error
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub container_name: String,
    pub container_id: String,
    pub container_image: String,
    /// Raw error line as read from the container
    pub error_log: String,
    /// Analysis text, or the unavailable placeholder
    pub analysis: String,
    pub observed_at: Timestamp,
    pub severity: Severity,
    pub error_type: String,
}

/// Trait for notification transports
///
/// `Ok(())` means the transport confirmed delivery; only then may the caller
/// treat the alert as sent.
pub trait Notifier: Send + Sync {
    fn send_alert<'a>(
        &'a self,
        alert: &'a Alert,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>>;

    fn send_text<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>>;
}

/// Feishu (Lark) custom-bot webhook notifier
///
/// Posts an interactive card per alert. Feishu answers every request with
/// HTTP 200 and reports failures in the body, so delivery is only confirmed
/// when the body carries `code == 0`.
pub struct FeishuNotifier {
    client: Client,
    webhook_url: String,
}

/// Top-level webhook message
#[derive(Debug, Serialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
enum FeishuMessage {
    Text { content: TextContent },
    Interactive { card: Card },
}

#[derive(Debug, Serialize)]
struct TextContent {
    text: String,
}

#[derive(Debug, Serialize)]
struct Card {
    config: CardConfig,
    header: CardHeader,
    elements: Vec<CardElement>,
}

#[derive(Debug, Serialize)]
struct CardConfig {
    wide_screen_mode: bool,
}

#[derive(Debug, Serialize)]
struct CardHeader {
    title: CardText,
    template: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
enum CardText {
    PlainText { content: String },
    LarkMd { content: String },
}

#[derive(Debug, Serialize)]
struct CardField {
    is_short: bool,
    text: CardText,
}

#[derive(Debug, Serialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
enum CardElement {
    Div {
        #[serde(skip_serializing_if = "Option::is_none")]
        fields: Option<Vec<CardField>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<CardText>,
    },
    Hr,
    Note {
        elements: Vec<CardText>,
    },
}

/// Response body returned by the webhook
#[derive(Debug, Deserialize)]
struct FeishuResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
}

impl FeishuNotifier {
    /// Create a notifier for a custom-bot webhook URL
    ///
    /// # Errors
    ///
    /// Returns `AlertError::HttpError` if the HTTP client cannot be built.
    pub fn new(webhook_url: String) -> Result<Self, AlertError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .no_proxy()
            .build()
            .map_err(|e| AlertError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            webhook_url,
        })
    }

    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    /// Send the startup message used to verify the webhook
    pub async fn test_connection(&self) -> Result<(), AlertError> {
        self.send_text("✅ Docker log monitor started").await
    }

    fn build_card(alert: &Alert) -> FeishuMessage {
        let error_log = truncate_log(&alert.error_log);
        let time_str = alert.observed_at.format("%Y-%m-%d %H:%M:%S").to_string();

        let field = |label: &str, value: &str| CardField {
            is_short: true,
            text: CardText::LarkMd {
                content: format!("**{}**\n{}", label, value),
            },
        };

        FeishuMessage::Interactive {
            card: Card {
                config: CardConfig {
                    wide_screen_mode: true,
                },
                header: CardHeader {
                    title: CardText::PlainText {
                        content: format!(
                            "🚨 Container error alert [{}] {}",
                            alert.severity, alert.error_type
                        ),
                    },
                    template: header_template(alert.severity).to_string(),
                },
                elements: vec![
                    CardElement::Div {
                        fields: Some(vec![
                            field("Container", &alert.container_name),
                            field("Container ID", &alert.container_id),
                            field("Image", &alert.container_image),
                            field("Time", &time_str),
                        ]),
                        text: None,
                    },
                    CardElement::Hr,
                    CardElement::Div {
                        fields: None,
                        text: Some(CardText::LarkMd {
                            content: format!("**📋 Error log**\n```\n{}\n```", error_log),
                        }),
                    },
                    CardElement::Hr,
                    CardElement::Div {
                        fields: None,
                        text: Some(CardText::LarkMd {
                            content: format!("**🤖 AI analysis**\n{}", alert.analysis),
                        }),
                    },
                    CardElement::Hr,
                    CardElement::Note {
                        elements: vec![CardText::PlainText {
                            content: "Sent automatically by the Docker log monitor".to_string(),
                        }],
                    },
                ],
            },
        }
    }

    async fn post(&self, message: &FeishuMessage) -> Result<(), AlertError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(message)
            .send()
            .await
            .map_err(|e| AlertError::HttpError(format!("Webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::NotificationFailed(format!(
                "Webhook returned HTTP {}",
                status
            )));
        }

        let body = response.text().await.map_err(|e| {
            AlertError::HttpError(format!("Failed to read webhook response: {}", e))
        })?;

        interpret_response(&body)
    }
}

impl Notifier for FeishuNotifier {
    fn send_alert<'a>(
        &'a self,
        alert: &'a Alert,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>> {
        Box::pin(async move {
            let message = Self::build_card(alert);
            match self.post(&message).await {
                Ok(()) => {
                    info!("Sent Feishu alert for container {}", alert.container_name);
                    Ok(())
                }
                Err(e) => {
                    error!(
                        "Failed to send Feishu alert for container {}: {}",
                        alert.container_name, e
                    );
                    Err(e)
                }
            }
        })
    }

    fn send_text<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>> {
        Box::pin(async move {
            let message = FeishuMessage::Text {
                content: TextContent {
                    text: text.to_string(),
                },
            };
            self.post(&message).await?;
            debug!("Sent Feishu text message");
            Ok(())
        })
    }
}

/// Map a webhook response body to a delivery result
fn interpret_response(body: &str) -> Result<(), AlertError> {
    let parsed: FeishuResponse = serde_json::from_str(body).map_err(|e| {
        AlertError::NotificationFailed(format!("Unexpected webhook response '{}': {}", body, e))
    })?;

    match parsed.code {
        Some(0) => Ok(()),
        Some(code) => Err(AlertError::Rejected {
            code,
            message: parsed.msg.unwrap_or_default(),
        }),
        None => Err(AlertError::NotificationFailed(format!(
            "Webhook response has no code: {}",
            body
        ))),
    }
}

fn header_template(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "red",
        Severity::Error => "orange",
        Severity::Warning => "yellow",
    }
}

/// Cut an error log to `MAX_LOG_CHARS` characters, marking the cut
///
/// Counts characters rather than bytes so multi-byte text never splits.
pub fn truncate_log(text: &str) -> String {
    match text.char_indices().nth(MAX_LOG_CHARS) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], TRUNCATION_SUFFIX),
        None => text.to_string(),
    }
}
