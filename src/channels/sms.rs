//! SMS sender over the Twilio Messages REST API.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::debug;

use crate::channels::compose;
use crate::channels::sender::{ChannelSender, DeliveryReceipt, OutboundMessage, SenderConnection};
use crate::config::TwilioConfig;
use crate::dispatch::model::Channel;
use crate::error::ChannelError;
use crate::store::{ConnectionProvider, Database};

pub struct SmsSender {
    db: Arc<dyn Database>,
    http: reqwest::Client,
    config: Option<TwilioConfig>,
}

impl SmsSender {
    /// `config` is `None` when no SMS provider is configured; every user
    /// then resolves to no connection.
    pub fn new(db: Arc<dyn Database>, config: Option<TwilioConfig>) -> Self {
        Self {
            db,
            http: super::http_client(),
            config,
        }
    }

    fn not_configured() -> ChannelError {
        ChannelError::NotConfigured {
            name: "sms".into(),
            reason: "TWILIO_ACCOUNT_SID / TWILIO_AUTH_TOKEN not set".into(),
        }
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    /// The user's own number when registered, else the shared sender number.
    async fn connection(&self, user_id: &str) -> Result<Option<SenderConnection>, ChannelError> {
        let Some(config) = &self.config else {
            return Ok(None);
        };

        let own_number = self
            .db
            .get_active_connection(user_id, Channel::Sms)
            .await?
            .filter(|c| c.provider == ConnectionProvider::Twilio)
            .map(|c| c.account_ref);

        Ok(own_number
            .or_else(|| config.from_number.clone())
            .map(|from_number| SenderConnection::Phone { from_number }))
    }

    async fn send(
        &self,
        connection: &SenderConnection,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, ChannelError> {
        let config = self.config.as_ref().ok_or_else(Self::not_configured)?;

        let SenderConnection::Phone { from_number } = connection else {
            return Err(ChannelError::NotConfigured {
                name: "sms".into(),
                reason: format!("unsupported connection kind: {}", connection.label()),
            });
        };

        let to = message
            .recipient
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ChannelError::InvalidRecipient {
                name: "sms".into(),
                reason: format!("{} has no phone number", message.recipient.name),
            })?;

        let body = compose::sms_body(&message.body);
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            config.base_url, config.account_sid
        );

        let resp = self
            .http
            .post(&url)
            .basic_auth(&config.account_sid, Some(config.auth_token.expose_secret()))
            .form(&[("To", to), ("From", from_number.as_str()), ("Body", body.as_str())])
            .send()
            .await
            .map_err(|e| super::request_error("sms", e))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let data: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if !status.is_success() {
            let body = data
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| {
                    if text.trim().is_empty() {
                        format!("HTTP {}", status.as_u16())
                    } else {
                        text.trim().to_string()
                    }
                });
            return Err(ChannelError::Http {
                name: "sms".into(),
                status: status.as_u16(),
                body,
            });
        }

        let sid = data.get("sid").and_then(Value::as_str).map(String::from);
        debug!(task_id = %message.task_id, ?sid, "SMS accepted");
        Ok(DeliveryReceipt {
            provider_message_id: sid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::test_support::serve;
    use crate::dispatch::model::{OutreachTask, Recipient};
    use crate::store::{ChannelConnection, LibSqlBackend};
    use axum::extract::{Form, Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use secrecy::SecretString;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<(String, bool, HashMap<String, String>)>>>;

    async fn stub(
        State(calls): State<Calls>,
        Path(sid): Path<String>,
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        let authed = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Basic "));
        let to = form.get("To").cloned().unwrap_or_default();
        calls.lock().unwrap().push((sid, authed, form));

        if to == "+15550000000" {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "code": 21211, "message": "Invalid 'To' Phone Number" })),
            )
        } else {
            (StatusCode::CREATED, Json(json!({ "sid": "SM123", "status": "queued" })))
        }
    }

    async fn setup(from_number: Option<&str>) -> (SmsSender, Arc<LibSqlBackend>, Calls) {
        let calls: Calls = Arc::default();
        let app = Router::new()
            .route("/2010-04-01/Accounts/{sid}/Messages.json", post(stub))
            .with_state(calls.clone());
        let base_url = serve(app).await;

        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let sender = SmsSender::new(
            db.clone(),
            Some(TwilioConfig {
                account_sid: "AC1".into(),
                auth_token: SecretString::from("tok".to_string()),
                from_number: from_number.map(String::from),
                base_url,
            }),
        );
        (sender, db, calls)
    }

    fn message(phone: Option<&str>) -> OutboundMessage {
        let mut recipient = Recipient::new("Ada Lovelace");
        if let Some(phone) = phone {
            recipient = recipient.with_phone(phone);
        }
        OutboundMessage::from_task(&OutreachTask::new(
            "u1",
            "camp",
            "cand",
            Channel::Sms,
            "Hi {{first_name}},\n\nquick question about a role.",
            recipient,
        ))
    }

    #[tokio::test]
    async fn unconfigured_provider_has_no_connection() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let sender = SmsSender::new(db, None);
        assert!(sender.connection("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn users_own_number_beats_shared_number() {
        let (sender, db, _) = setup(Some("+15551110000")).await;
        assert_eq!(
            sender.connection("u1").await.unwrap(),
            Some(SenderConnection::Phone {
                from_number: "+15551110000".into()
            })
        );

        db.upsert_connection(&ChannelConnection::active(
            "u1",
            Channel::Sms,
            ConnectionProvider::Twilio,
            "+15552220000",
        ))
        .await
        .unwrap();
        assert_eq!(
            sender.connection("u1").await.unwrap(),
            Some(SenderConnection::Phone {
                from_number: "+15552220000".into()
            })
        );
    }

    #[tokio::test]
    async fn no_sender_number_means_no_connection() {
        let (sender, _, _) = setup(None).await;
        assert!(sender.connection("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn posts_form_with_basic_auth() {
        let (sender, _, calls) = setup(Some("+15551110000")).await;
        let conn = sender.connection("u1").await.unwrap().unwrap();
        let receipt = sender
            .send(&conn, &message(Some("+15553334444")))
            .await
            .unwrap();
        assert_eq!(receipt.provider_message_id.as_deref(), Some("SM123"));

        let calls = calls.lock().unwrap();
        let (sid, authed, form) = &calls[0];
        assert_eq!(sid, "AC1");
        assert!(authed);
        assert_eq!(form["To"], "+15553334444");
        assert_eq!(form["From"], "+15551110000");
        assert_eq!(form["Body"], "Hi Ada, quick question about a role.");
    }

    #[tokio::test]
    async fn provider_error_message_is_surfaced() {
        let (sender, _, _) = setup(Some("+15551110000")).await;
        let conn = sender.connection("u1").await.unwrap().unwrap();
        let err = sender
            .send(&conn, &message(Some("+15550000000")))
            .await
            .unwrap_err();
        match err {
            ChannelError::Http { status, ref body, .. } => {
                assert_eq!(status, 400);
                assert_eq!(body, "Invalid 'To' Phone Number");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn missing_phone_is_invalid_recipient() {
        let (sender, _, calls) = setup(Some("+15551110000")).await;
        let conn = sender.connection("u1").await.unwrap().unwrap();
        let err = sender.send(&conn, &message(None)).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidRecipient { .. }));
        assert!(calls.lock().unwrap().is_empty());
    }
}
