//! HTTP client for the hosted connector that fronts LinkedIn and Gmail.
//!
//! Every send is one `POST {base}/actions/{action}/execute` carrying the
//! user's connected-account id and the action input.

use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tracing::debug;

use crate::channels::sender::DeliveryReceipt;
use crate::config::ComposioConfig;
use crate::dispatch::model::Channel;
use crate::error::ChannelError;

/// Keys checked, in order, for a provider message id.
const MESSAGE_ID_KEYS: &[&str] = &["message_id", "messageId", "id", "threadId"];

pub struct ComposioClient {
    http: reqwest::Client,
    config: ComposioConfig,
}

impl ComposioClient {
    pub fn new(config: ComposioConfig) -> Self {
        Self::with_http(config, super::http_client())
    }

    pub fn with_http(config: ComposioConfig, http: reqwest::Client) -> Self {
        Self { http, config }
    }

    pub fn linkedin_action(&self) -> &str {
        &self.config.linkedin_action
    }

    pub fn email_action(&self) -> &str {
        &self.config.email_action
    }

    /// Execute one action on behalf of a connected account.
    pub async fn execute(
        &self,
        channel: Channel,
        action: &str,
        account_id: &str,
        input: Value,
    ) -> Result<DeliveryReceipt, ChannelError> {
        let name = channel.as_str().to_string();
        let url = format!("{}/actions/{action}/execute", self.config.base_url);

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", self.config.api_key.expose_secret())
            .json(&json!({
                "connectedAccountId": account_id,
                "input": input,
            }))
            .send()
            .await
            .map_err(|e| super::request_error(&name, e))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let data: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(ChannelError::Http {
                name,
                status: status.as_u16(),
                body: error_message(&data, &text, status.as_u16()),
            });
        }

        let successful = data
            .get("successful")
            .and_then(Value::as_bool)
            .or_else(|| {
                data.pointer("/execution_details/executed")
                    .and_then(Value::as_bool)
            })
            .unwrap_or(true);

        if !successful {
            return Err(ChannelError::Rejected {
                name,
                reason: error_message(&data, &text, status.as_u16()),
            });
        }

        let provider_message_id = extract_message_id(&data);
        debug!(channel = %channel, action, ?provider_message_id, "Connector action executed");
        Ok(DeliveryReceipt {
            provider_message_id,
        })
    }
}

/// Human-readable error from a connector reply; never empty.
fn error_message(data: &Value, raw: &str, status: u16) -> String {
    let from_json = ["message", "error"].iter().find_map(|key| match data.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Object(obj)) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(String::from),
        _ => None,
    });

    from_json.unwrap_or_else(|| {
        let raw = raw.trim();
        if raw.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {raw}")
        }
    })
}

/// Look for a message id in `response_data`, then `data`, then the root.
fn extract_message_id(data: &Value) -> Option<String> {
    let candidates = [data.get("response_data"), data.get("data"), Some(data)];
    candidates.into_iter().flatten().find_map(|obj| {
        MESSAGE_ID_KEYS.iter().find_map(|key| match obj.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::test_support::serve;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use crate::channels::{LinkedInSender, RetryPolicy, RetryingSender};
    use crate::channels::{ChannelSender, OutboundMessage, SenderConnection};
    use crate::dispatch::model::{OutreachTask, Recipient};
    use crate::store::{Database, LibSqlBackend};
    use secrecy::SecretString;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured {
        calls: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    }

    async fn stub(
        State(captured): State<Captured>,
        Path(action): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let key = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        captured
            .calls
            .lock()
            .unwrap()
            .push((action.clone(), key, body));

        match action.as_str() {
            "BROKEN" => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": "upstream exploded" })),
            ),
            "DECLINED" => (
                StatusCode::OK,
                Json(json!({ "successful": false, "error": "recipient blocked" })),
            ),
            _ => (
                StatusCode::OK,
                Json(json!({ "successful": true, "data": { "id": "msg_42" } })),
            ),
        }
    }

    async fn client() -> (ComposioClient, Captured) {
        let captured = Captured::default();
        let app = Router::new()
            .route("/actions/{action}/execute", post(stub))
            .with_state(captured.clone());
        let base_url = serve(app).await;
        let client = ComposioClient::new(ComposioConfig {
            api_key: SecretString::from("ck_test".to_string()),
            base_url,
            linkedin_action: "LINKEDIN_SEND_MESSAGE".into(),
            email_action: "GMAIL_SEND_EMAIL".into(),
        });
        (client, captured)
    }

    #[tokio::test]
    async fn execute_posts_account_and_input() {
        let (client, captured) = client().await;
        let receipt = client
            .execute(
                Channel::Email,
                "GMAIL_SEND_EMAIL",
                "ca_1",
                json!({ "recipient_email": "ada@example.com" }),
            )
            .await
            .unwrap();
        assert_eq!(receipt.provider_message_id.as_deref(), Some("msg_42"));

        let calls = captured.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (action, key, body) = &calls[0];
        assert_eq!(action, "GMAIL_SEND_EMAIL");
        assert_eq!(key.as_deref(), Some("ck_test"));
        assert_eq!(body["connectedAccountId"], "ca_1");
        assert_eq!(body["input"]["recipient_email"], "ada@example.com");
    }

    #[tokio::test]
    async fn server_error_maps_to_http_error() {
        let (client, _) = client().await;
        let err = client
            .execute(Channel::Email, "BROKEN", "ca_1", json!({}))
            .await
            .unwrap_err();
        match err {
            ChannelError::Http { status, ref body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "upstream exploded");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unsuccessful_execution_is_rejected() {
        let (client, _) = client().await;
        let err = client
            .execute(Channel::LinkedIn, "DECLINED", "ca_1", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Rejected { ref reason, .. } if reason == "recipient blocked"));
    }

    #[tokio::test]
    async fn refused_connection_is_retryable() {
        let client = ComposioClient::new(ComposioConfig {
            api_key: SecretString::from("ck".to_string()),
            base_url: "http://127.0.0.1:1".into(),
            linkedin_action: "L".into(),
            email_action: "E".into(),
        });
        let err = client
            .execute(Channel::Email, "E", "ca", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::NotDelivered { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn timed_out_send_is_not_retried() {
        let hits = Arc::new(Mutex::new(0u32));
        let counter = hits.clone();
        let app = Router::new().route(
            "/actions/{action}/execute",
            post(move || {
                let counter = counter.clone();
                async move {
                    *counter.lock().unwrap() += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    Json(json!({ "successful": true }))
                }
            }),
        );
        let base_url = serve(app).await;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(50))
            .build()
            .unwrap();
        let client = Arc::new(ComposioClient::with_http(
            ComposioConfig {
                api_key: SecretString::from("ck".to_string()),
                base_url,
                linkedin_action: "LINKEDIN_SEND_MESSAGE".into(),
                email_action: "GMAIL_SEND_EMAIL".into(),
            },
            http,
        ));

        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let sender = RetryingSender::new(
            Arc::new(LinkedInSender::new(db, client)),
            RetryPolicy {
                max_retries: 3,
                base_delay: std::time::Duration::from_millis(1),
                multiplier: 2.0,
            },
        );
        let task = OutreachTask::new(
            "u1",
            "camp",
            "cand",
            Channel::LinkedIn,
            "hi",
            Recipient::new("Ada").with_linkedin("https://linkedin.com/in/ada"),
        );
        let err = sender
            .send(
                &SenderConnection::Connector {
                    account_id: "ca_1".into(),
                },
                &OutboundMessage::from_task(&task),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::SendFailed { .. }));
        assert!(!err.is_transient());
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn error_message_falls_back_to_status() {
        assert_eq!(error_message(&Value::Null, "", 502), "HTTP 502");
        assert_eq!(
            error_message(&Value::Null, "Bad Gateway", 502),
            "HTTP 502: Bad Gateway"
        );
        assert_eq!(
            error_message(&json!({ "error": { "message": "nested" } }), "", 400),
            "nested"
        );
    }

    #[test]
    fn message_id_search_order() {
        assert_eq!(
            extract_message_id(&json!({ "response_data": { "messageId": "a" }, "id": "b" })),
            Some("a".into())
        );
        assert_eq!(extract_message_id(&json!({ "id": 7 })), Some("7".into()));
        assert_eq!(extract_message_id(&json!({ "successful": true })), None);
    }
}
