//! Delivery of reset tokens and temporary passwords to users
//!
//! The credential core only decides *what* to send; the messaging peer does
//! the sending. Failures carry a peer status so the retry layer can tell a
//! flaky peer from a request that will never succeed.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::metrics::Metrics;
use crate::models::Identifier;
use crate::retry::{RetryError, RetryPolicy, with_retry};

/// Status reported by (or inferred for) the messaging peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    Aborted,
    Internal,
    Unknown,
    InvalidArgument,
    NotFound,
    PermissionDenied,
    Unauthenticated,
    FailedPrecondition,
}

impl PeerStatus {
    /// Whether the same request may succeed when sent again
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            PeerStatus::Unavailable
                | PeerStatus::DeadlineExceeded
                | PeerStatus::ResourceExhausted
                | PeerStatus::Aborted
                | PeerStatus::Internal
                | PeerStatus::Unknown
        )
    }

    pub fn from_http(status: StatusCode) -> Self {
        match status {
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => PeerStatus::Unavailable,
            StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => {
                PeerStatus::DeadlineExceeded
            }
            StatusCode::TOO_MANY_REQUESTS => PeerStatus::ResourceExhausted,
            StatusCode::CONFLICT => PeerStatus::Aborted,
            StatusCode::INTERNAL_SERVER_ERROR => PeerStatus::Internal,
            StatusCode::NOT_FOUND => PeerStatus::NotFound,
            StatusCode::UNAUTHORIZED => PeerStatus::Unauthenticated,
            StatusCode::FORBIDDEN => PeerStatus::PermissionDenied,
            StatusCode::PRECONDITION_FAILED => PeerStatus::FailedPrecondition,
            s if s.is_client_error() => PeerStatus::InvalidArgument,
            _ => PeerStatus::Unknown,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("notification failed ({code:?}): {message}")]
pub struct NotificationError {
    pub code: PeerStatus,
    pub message: String,
}

impl NotificationError {
    pub fn new(code: PeerStatus, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            PeerStatus::DeadlineExceeded
        } else if err.is_connect() {
            PeerStatus::Unavailable
        } else if let Some(status) = err.status() {
            PeerStatus::from_http(status)
        } else {
            PeerStatus::Unknown
        };
        // without the URL: it may carry query parameters
        NotificationError::new(code, err.without_url().to_string())
    }
}

/// Outbound messages to users
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_reset_token(
        &self,
        recipient: &Identifier,
        token: &str,
    ) -> Result<(), NotificationError>;

    async fn send_password(
        &self,
        recipient: &Identifier,
        password: &str,
    ) -> Result<(), NotificationError>;
}

fn reset_token_message(token: &str, ttl_minutes: i64) -> String {
    format!(
        "Your password reset code: {}\n\nThe code is valid for {} minutes.\n\
         If you did not request a password reset, ignore this message.",
        token, ttl_minutes
    )
}

fn password_message(password: &str) -> String {
    format!(
        "Your temporary password: {}\n\nPlease change it after your first sign-in.",
        password
    )
}

/// Development notifier: records that a message would be sent, never its content
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_reset_token(
        &self,
        recipient: &Identifier,
        _token: &str,
    ) -> Result<(), NotificationError> {
        info!("Reset token notification for {} (not delivered)", recipient.masked());
        Ok(())
    }

    async fn send_password(
        &self,
        recipient: &Identifier,
        _password: &str,
    ) -> Result<(), NotificationError> {
        info!("Password notification for {} (not delivered)", recipient.masked());
        Ok(())
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    recipient: String,
    text: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Notifier talking to the messaging peer over HTTP
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
    reset_token_ttl_minutes: i64,
}

impl HttpNotifier {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        reset_token_ttl_minutes: i64,
    ) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NotificationError::from)?;

        Ok(Self {
            client,
            endpoint: format!("{}/notifications", base_url.trim_end_matches('/')),
            reset_token_ttl_minutes,
        })
    }

    async fn send(&self, recipient: &Identifier, text: &str) -> Result<(), NotificationError> {
        if !recipient.is_reachable() {
            return Err(NotificationError::new(
                PeerStatus::FailedPrecondition,
                "recipient has no deliverable address",
            ));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&SendRequest {
                recipient: recipient.to_string(),
                text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::new(
                PeerStatus::from_http(status),
                format!("messaging peer returned {}", status),
            ));
        }

        let body: SendResponse = response.json().await?;
        match (body.success, body.error) {
            (_, Some(message)) if !message.is_empty() => {
                Err(NotificationError::new(PeerStatus::Internal, message))
            }
            (false, _) => Err(NotificationError::new(
                PeerStatus::Unknown,
                "notification delivery failed",
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_reset_token(
        &self,
        recipient: &Identifier,
        token: &str,
    ) -> Result<(), NotificationError> {
        self.send(recipient, &reset_token_message(token, self.reset_token_ttl_minutes))
            .await
    }

    async fn send_password(
        &self,
        recipient: &Identifier,
        password: &str,
    ) -> Result<(), NotificationError> {
        self.send(recipient, &password_message(password)).await
    }
}

/// Retries transient delivery failures, bounded by an overall deadline
pub struct RetryingNotifier {
    inner: Arc<dyn Notifier>,
    policy: RetryPolicy,
    deadline: Duration,
}

impl RetryingNotifier {
    pub fn new(inner: Arc<dyn Notifier>, policy: RetryPolicy, deadline: Duration) -> Self {
        Self {
            inner,
            policy,
            deadline,
        }
    }

    fn flatten(&self, operation: &str, err: RetryError<NotificationError>) -> NotificationError {
        match err {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { retries, last } => NotificationError::new(
                last.code,
                format!("{} failed after {} retries: {}", operation, retries, last.message),
            ),
            RetryError::Cancelled { attempts, last } => NotificationError::new(
                PeerStatus::DeadlineExceeded,
                match last {
                    Some(e) => format!("{} timed out after {} attempts: {}", operation, attempts, e.message),
                    None => format!("{} timed out", operation),
                },
            ),
        }
    }
}

#[async_trait]
impl Notifier for RetryingNotifier {
    async fn send_reset_token(
        &self,
        recipient: &Identifier,
        token: &str,
    ) -> Result<(), NotificationError> {
        with_retry(
            &self.policy,
            "notifier.send_reset_token",
            NotificationError::is_transient,
            tokio::time::sleep(self.deadline),
            move || self.inner.send_reset_token(recipient, token),
        )
        .await
        .map_err(|e| self.flatten("notifier.send_reset_token", e))
    }

    async fn send_password(
        &self,
        recipient: &Identifier,
        password: &str,
    ) -> Result<(), NotificationError> {
        with_retry(
            &self.policy,
            "notifier.send_password",
            NotificationError::is_transient,
            tokio::time::sleep(self.deadline),
            move || self.inner.send_password(recipient, password),
        )
        .await
        .map_err(|e| self.flatten("notifier.send_password", e))
    }
}

/// Counts delivered and failed notifications
pub struct MeteredNotifier {
    inner: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
}

impl MeteredNotifier {
    pub fn new(inner: Arc<dyn Notifier>, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }

    fn record(&self, kind: &str, recipient: &Identifier, result: &Result<(), NotificationError>) {
        match result {
            Ok(()) => self.metrics.record_notification_sent(),
            Err(e) => {
                self.metrics.record_notification_failed();
                if e.is_transient() {
                    warn!("{} notification to {} failed: {}", kind, recipient.masked(), e);
                } else {
                    error!("{} notification to {} failed: {}", kind, recipient.masked(), e);
                }
            }
        }
    }
}

#[async_trait]
impl Notifier for MeteredNotifier {
    async fn send_reset_token(
        &self,
        recipient: &Identifier,
        token: &str,
    ) -> Result<(), NotificationError> {
        let result = self.inner.send_reset_token(recipient, token).await;
        self.record("Reset token", recipient, &result);
        result
    }

    async fn send_password(
        &self,
        recipient: &Identifier,
        password: &str,
    ) -> Result<(), NotificationError> {
        let result = self.inner.send_password(recipient, password).await;
        self.record("Password", recipient, &result);
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Notifier that fails with the queued errors, then succeeds
    #[derive(Default)]
    pub(crate) struct ScriptedNotifier {
        failures: Mutex<Vec<NotificationError>>,
        pub(crate) delivered: Mutex<Vec<(Identifier, String)>>,
    }

    impl ScriptedNotifier {
        pub(crate) fn failing_with(errors: Vec<NotificationError>) -> Self {
            Self {
                failures: Mutex::new(errors),
                delivered: Mutex::new(Vec::new()),
            }
        }

        fn next(&self, recipient: &Identifier, payload: &str) -> Result<(), NotificationError> {
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                self.delivered
                    .lock()
                    .unwrap()
                    .push((recipient.clone(), payload.to_string()));
                Ok(())
            } else {
                Err(failures.remove(0))
            }
        }
    }

    #[async_trait]
    impl Notifier for ScriptedNotifier {
        async fn send_reset_token(
            &self,
            recipient: &Identifier,
            token: &str,
        ) -> Result<(), NotificationError> {
            self.next(recipient, token)
        }

        async fn send_password(
            &self,
            recipient: &Identifier,
            password: &str,
        ) -> Result<(), NotificationError> {
            self.next(recipient, password)
        }
    }

    fn phone() -> Identifier {
        Identifier::Phone("+79991234567".into())
    }

    #[test]
    fn http_status_classification() {
        assert_eq!(PeerStatus::from_http(StatusCode::SERVICE_UNAVAILABLE), PeerStatus::Unavailable);
        assert_eq!(PeerStatus::from_http(StatusCode::GATEWAY_TIMEOUT), PeerStatus::DeadlineExceeded);
        assert_eq!(
            PeerStatus::from_http(StatusCode::TOO_MANY_REQUESTS),
            PeerStatus::ResourceExhausted
        );
        assert_eq!(PeerStatus::from_http(StatusCode::BAD_REQUEST), PeerStatus::InvalidArgument);
        assert!(PeerStatus::from_http(StatusCode::INTERNAL_SERVER_ERROR).is_transient());
        assert!(!PeerStatus::from_http(StatusCode::UNPROCESSABLE_ENTITY).is_transient());
    }

    #[test]
    fn messages_carry_the_secret_for_the_user() {
        assert!(reset_token_message("abc123", 15).contains("abc123"));
        assert!(reset_token_message("abc123", 15).contains("15 minutes"));
        assert!(password_message("Xy7!").contains("Xy7!"));
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_notifier_rides_out_transient_failures() {
        let inner = Arc::new(ScriptedNotifier::failing_with(vec![
            NotificationError::new(PeerStatus::Unavailable, "down"),
            NotificationError::new(PeerStatus::DeadlineExceeded, "slow"),
        ]));
        let notifier =
            RetryingNotifier::new(inner.clone(), RetryPolicy::default(), Duration::from_secs(30));

        notifier.send_reset_token(&phone(), "token").await.unwrap();
        assert_eq!(inner.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_notifier_gives_up() {
        let errors = (0..4)
            .map(|_| NotificationError::new(PeerStatus::Unavailable, "down"))
            .collect();
        let inner = Arc::new(ScriptedNotifier::failing_with(errors));
        let notifier =
            RetryingNotifier::new(inner.clone(), RetryPolicy::default(), Duration::from_secs(30));

        let err = notifier.send_password(&phone(), "pw").await.unwrap_err();
        assert!(err.message.contains("failed after 3 retries"));
        assert_eq!(err.code, PeerStatus::Unavailable);
        assert!(inner.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_notifier_respects_deadline() {
        let errors = (0..4)
            .map(|_| NotificationError::new(PeerStatus::Unavailable, "down"))
            .collect();
        let inner = Arc::new(ScriptedNotifier::failing_with(errors));
        let notifier =
            RetryingNotifier::new(inner, RetryPolicy::default(), Duration::from_secs(2));

        let err = notifier.send_password(&phone(), "pw").await.unwrap_err();
        assert_eq!(err.code, PeerStatus::DeadlineExceeded);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let inner = Arc::new(ScriptedNotifier::failing_with(vec![NotificationError::new(
            PeerStatus::InvalidArgument,
            "bad phone",
        )]));
        let notifier =
            RetryingNotifier::new(inner.clone(), RetryPolicy::default(), Duration::from_secs(30));

        let err = notifier.send_password(&phone(), "pw").await.unwrap_err();
        assert_eq!(err.code, PeerStatus::InvalidArgument);
    }

    #[tokio::test]
    async fn metered_notifier_counts_outcomes() {
        let metrics = Arc::new(Metrics::new());
        let inner = Arc::new(ScriptedNotifier::failing_with(vec![NotificationError::new(
            PeerStatus::InvalidArgument,
            "bad phone",
        )]));
        let notifier = MeteredNotifier::new(inner, metrics.clone());

        assert!(notifier.send_password(&phone(), "pw").await.is_err());
        notifier.send_password(&phone(), "pw").await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.notifications_sent, 1);
        assert_eq!(snapshot.notifications_failed, 1);
        assert_eq!(snapshot.notification_success_rate, 0.5);
    }

    #[tokio::test]
    async fn http_notifier_refuses_unreachable_recipients() {
        let notifier = HttpNotifier::new("http://127.0.0.1:9", Duration::from_secs(1), 15).unwrap();
        let err = notifier
            .send_password(&Identifier::External(5), "pw")
            .await
            .unwrap_err();
        assert_eq!(err.code, PeerStatus::FailedPrecondition);
        assert!(!err.is_transient());
    }
}
