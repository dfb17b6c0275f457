//! Notification fan-out
//!
//! Resolves the recipient for a wallet, renders the event per transport
//! (Telegram chat message, HMAC-signed JSON webhook), and delivers with
//! bounded retry. An event counts as delivered when any transport
//! succeeded; drops are logged, never queued.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::error::{Error, Result};
use crate::store::{keys, Store};
use crate::types::Recipient;

type HmacSha256 = Hmac<Sha256>;

/// What happened, as seen by the monitor or the composer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    OutOfRange,
    BackInRange,
    DcaExecuted,
    DcaFailed,
    RebalanceExecuted,
    DailySummary,
}

/// Suggested follow-up the receiver can act on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub endpoint: String,
    pub params: serde_json::Value,
}

/// Event payload routed to a wallet's transports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub wallet: String,
    pub position_id: Option<String>,
    pub pool: Option<String>,
    /// Distance from the range edge in grid units, venue-agnostic
    pub drift_units: Option<u32>,
    pub message: String,
    pub suggested_action: Option<SuggestedAction>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, wallet: &str, message: String) -> Self {
        Self {
            kind,
            wallet: wallet.to_string(),
            position_id: None,
            pool: None,
            drift_units: None,
            message,
            suggested_action: None,
            timestamp: Utc::now(),
        }
    }
}

/// Per-transport delivery result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub telegram_ok: Option<bool>,
    pub webhook_ok: Option<bool>,
}

impl DeliveryReport {
    /// Delivered iff any enabled transport succeeded
    pub fn delivered(&self) -> bool {
        self.telegram_ok.unwrap_or(false) || self.webhook_ok.unwrap_or(false)
    }
}

pub struct NotificationRouter {
    config: NotifyConfig,
    http: reqwest::Client,
    store: Store,
}

impl NotificationRouter {
    pub fn new(config: NotifyConfig, store: Store) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http,
            store,
        })
    }

    /// Register or replace a wallet's recipient record
    pub async fn register(&self, recipient: &Recipient) -> Result<()> {
        recipient.validate()?;
        self.store
            .set(&keys::recipient(&recipient.wallet), recipient)
            .await
    }

    pub async fn recipient(&self, wallet: &str) -> Result<Option<Recipient>> {
        self.store.get(&keys::recipient(wallet)).await
    }

    /// Deliver an event to the wallet's recipient, honoring preferences
    pub async fn notify(&self, event: &Event) -> Result<DeliveryReport> {
        let Some(recipient) = self.recipient(&event.wallet).await? else {
            debug!("no recipient registered for {}", event.wallet);
            return Ok(DeliveryReport::default());
        };

        if !wants(&recipient, event.kind) {
            debug!(
                "recipient {} opted out of {:?}",
                event.wallet, event.kind
            );
            return Ok(DeliveryReport::default());
        }

        let mut report = DeliveryReport::default();

        if let Some(telegram) = &recipient.telegram {
            let text = render_chat(event);
            let ok = self
                .with_retry("telegram", || self.send_telegram(&telegram.chat_id, &text))
                .await;
            report.telegram_ok = Some(ok);
        }

        if let Some(webhook) = &recipient.webhook {
            let ok = self
                .with_retry("webhook", || {
                    self.send_webhook(&webhook.url, &webhook.secret, event)
                })
                .await;
            report.webhook_ok = Some(ok);
        }

        if report.delivered() {
            info!("delivered {:?} to {}", event.kind, event.wallet);
        } else {
            warn!("all transports failed for {:?} to {}", event.kind, event.wallet);
        }
        Ok(report)
    }

    async fn with_retry<F, Fut>(&self, transport: &str, call: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let base = Duration::from_secs(self.config.retry_base_secs);
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(base * 2u32.pow(attempt - 1)).await;
            }
            match call().await {
                Ok(()) => return true,
                Err(e) => debug!("{} attempt {} failed: {}", transport, attempt + 1, e),
            }
        }
        false
    }

    async fn send_telegram(&self, chat_id: &str, text: &str) -> Result<()> {
        if self.config.telegram_bot_token.is_empty() {
            return Err(Error::Config("telegram bot token not configured".into()));
        }
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.telegram_bot_token
        );
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .send()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("telegram: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::VenueUnavailable(format!(
                "telegram returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn send_webhook(&self, url: &str, secret: &str, event: &Event) -> Result<()> {
        let body = canonical_payload(event)?;
        let signature = sign_payload(secret, &body);
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Signature", signature)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::VenueUnavailable(format!("webhook: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::VenueUnavailable(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Preference gate per event kind
fn wants(recipient: &Recipient, kind: EventKind) -> bool {
    match kind {
        EventKind::OutOfRange => recipient.preferences.alert_out_of_range,
        EventKind::BackInRange => recipient.preferences.alert_back_in_range,
        EventKind::DailySummary => recipient.preferences.daily_summary,
        EventKind::DcaExecuted | EventKind::DcaFailed | EventKind::RebalanceExecuted => true,
    }
}

/// Chat-formatted rendering
fn render_chat(event: &Event) -> String {
    let mut text = match event.kind {
        EventKind::OutOfRange => "⚠️ *Position out of range*".to_string(),
        EventKind::BackInRange => "✅ *Position back in range*".to_string(),
        EventKind::DcaExecuted => "💧 *Scheduled deposit executed*".to_string(),
        EventKind::DcaFailed => "❌ *Scheduled deposit failed*".to_string(),
        EventKind::RebalanceExecuted => "🔄 *Position rebalanced*".to_string(),
        EventKind::DailySummary => "📊 *Daily summary*".to_string(),
    };
    text.push('\n');
    text.push_str(&event.message);
    if let Some(position) = &event.position_id {
        text.push_str(&format!("\nPosition: `{}`", position));
    }
    if let Some(drift) = event.drift_units {
        text.push_str(&format!("\nDrift: {} grid units", drift));
    }
    text
}

/// Canonical serialization the HMAC covers: fixed field order, no
/// whitespace. The receiver must verify over the exact bytes.
fn canonical_payload(event: &Event) -> Result<String> {
    let payload = json!({
        "event": event.kind,
        "wallet": event.wallet,
        "positionId": event.position_id,
        "pool": event.pool,
        "driftUnits": event.drift_units,
        "message": event.message,
        "suggestedAction": event.suggested_action,
        "timestamp": event.timestamp.to_rfc3339(),
    });
    Ok(serde_json::to_string(&payload)?)
}

/// Hex HMAC-SHA256 of the payload under the recipient's secret
fn sign_payload(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Preferences, TelegramTarget, WebhookTarget};

    fn recipient(out_of_range: bool, back_in_range: bool) -> Recipient {
        Recipient {
            wallet: "w1".into(),
            telegram: Some(TelegramTarget {
                chat_id: "123".into(),
            }),
            webhook: Some(WebhookTarget {
                url: "https://example.com/hook".into(),
                secret: "s3cret".into(),
            }),
            preferences: Preferences {
                alert_out_of_range: out_of_range,
                alert_back_in_range: back_in_range,
                daily_summary: false,
                auto_rebalance: false,
                rebalance_drift_bps: 200,
            },
        }
    }

    #[test]
    fn test_preference_gating() {
        let r = recipient(true, false);
        assert!(wants(&r, EventKind::OutOfRange));
        assert!(!wants(&r, EventKind::BackInRange));
        assert!(wants(&r, EventKind::DcaExecuted));
        assert!(!wants(&r, EventKind::DailySummary));
    }

    #[test]
    fn test_delivery_predicate() {
        // delivered <=> telegram.ok or webhook.ok
        let both_fail = DeliveryReport {
            telegram_ok: Some(false),
            webhook_ok: Some(false),
        };
        assert!(!both_fail.delivered());

        let one_ok = DeliveryReport {
            telegram_ok: Some(false),
            webhook_ok: Some(true),
        };
        assert!(one_ok.delivered());

        let none_enabled = DeliveryReport::default();
        assert!(!none_enabled.delivered());
    }

    #[test]
    fn test_signature_is_deterministic() {
        let event = Event::new(EventKind::OutOfRange, "w1", "pool moved".into());
        let payload = canonical_payload(&event).unwrap();
        let sig1 = sign_payload("secret", &payload);
        let sig2 = sign_payload("secret", &payload);
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);
        // Different key, different signature
        assert_ne!(sig1, sign_payload("other", &payload));
    }

    #[test]
    fn test_canonical_payload_fields() {
        let mut event = Event::new(EventKind::OutOfRange, "w1", "pool moved".into());
        event.position_id = Some("pos1".into());
        event.pool = Some("pool1".into());
        event.drift_units = Some(3);
        event.suggested_action = Some(SuggestedAction {
            endpoint: "/lp/rebalance".into(),
            params: json!({"position": "pos1"}),
        });
        let payload = canonical_payload(&event).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["event"], "OUT_OF_RANGE");
        assert_eq!(value["wallet"], "w1");
        assert_eq!(value["driftUnits"], 3);
        assert_eq!(value["suggestedAction"]["endpoint"], "/lp/rebalance");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_render_chat_includes_drift() {
        let mut event = Event::new(EventKind::OutOfRange, "w1", "SOL-USDC".into());
        event.drift_units = Some(5);
        let text = render_chat(&event);
        assert!(text.contains("out of range"));
        assert!(text.contains("5 grid units"));
    }
}
