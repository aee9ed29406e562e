//! Credential flows against the in-memory stores

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{StoreError, StoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use auth_service::{
    audit::MemoryAuditLog,
    error::AuthError,
    jwt::{JwtConfig, JwtService},
    max_auth::{InitDataError, data_check_string, sign},
    metrics::Metrics,
    models::{
        ExternalAccount, Identifier, NewUser, PasswordResetToken, RoleName, Scope, User, UserId,
    },
    notification::{MeteredNotifier, NotificationError, Notifier, PeerStatus},
    password::{Argon2Hasher, HasherConfig},
    repositories::{
        InMemoryResetTokenRepository, InMemoryRoleRepository, InMemoryUserRepository,
        ResetTokenRepository, UserRepository,
    },
    reset::RESET_TOKEN_LENGTH,
    service::{CredentialService, RegisterRequest, ServiceSettings, Stores},
    session::InMemorySessionRegistry,
    validation::PasswordPolicy,
};

const PASSWORD: &str = "Str0ng!Passw0rd";
const NEW_PASSWORD: &str = "An0ther#Secret9";
const BOT_TOKEN: &str = "bot-secret";

#[derive(Default)]
struct CapturingNotifier {
    reset_tokens: Mutex<Vec<(Identifier, String)>>,
    passwords: Mutex<Vec<(Identifier, String)>>,
    failure: Mutex<Option<NotificationError>>,
}

impl CapturingNotifier {
    fn fail_with(&self, error: NotificationError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    fn check(&self) -> Result<(), NotificationError> {
        match self.failure.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn last_reset_token(&self) -> String {
        self.reset_tokens.lock().unwrap().last().unwrap().1.clone()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send_reset_token(
        &self,
        recipient: &Identifier,
        token: &str,
    ) -> Result<(), NotificationError> {
        self.check()?;
        self.reset_tokens
            .lock()
            .unwrap()
            .push((recipient.clone(), token.to_string()));
        Ok(())
    }

    async fn send_password(
        &self,
        recipient: &Identifier,
        password: &str,
    ) -> Result<(), NotificationError> {
        self.check()?;
        self.passwords
            .lock()
            .unwrap()
            .push((recipient.clone(), password.to_string()));
        Ok(())
    }
}

/// User store whose next password update can be made to fail
#[derive(Default)]
struct FlakyUsers {
    inner: InMemoryUserRepository,
    fail_password_update: AtomicBool,
}

#[async_trait]
impl UserRepository for FlakyUsers {
    async fn create(&self, new_user: &NewUser) -> StoreResult<User> {
        self.inner.create(new_user).await
    }

    async fn find_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_identifier(&self, identifier: &Identifier) -> StoreResult<Option<User>> {
        self.inner.find_by_identifier(identifier).await
    }

    async fn upsert_external(
        &self,
        account: &ExternalAccount,
        default_role: Option<RoleName>,
    ) -> StoreResult<(User, bool)> {
        self.inner.upsert_external(account, default_role).await
    }

    async fn update_password(&self, id: UserId, password_hash: &str) -> StoreResult<bool> {
        if self.fail_password_update.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Configuration("users table is read-only".into()));
        }
        self.inner.update_password(id, password_hash).await
    }

    async fn set_role(&self, id: UserId, role: Option<RoleName>) -> StoreResult<bool> {
        self.inner.set_role(id, role).await
    }
}

struct Harness {
    service: CredentialService,
    users: InMemoryUserRepository,
    flaky_users: Arc<FlakyUsers>,
    reset_tokens: InMemoryResetTokenRepository,
    sessions: InMemorySessionRegistry,
    notifier: Arc<CapturingNotifier>,
    audit: Arc<MemoryAuditLog>,
}

fn harness_with(max_bot_token: &str) -> Harness {
    let flaky_users = Arc::new(FlakyUsers::default());
    let users = flaky_users.inner.clone();
    let reset_tokens = InMemoryResetTokenRepository::new(flaky_users.clone());
    let sessions = InMemorySessionRegistry::new();
    let notifier = Arc::new(CapturingNotifier::default());
    let audit = Arc::new(MemoryAuditLog::new());
    let metrics = Arc::new(Metrics::new());

    let jwt = JwtService::new(JwtConfig {
        access_secret: "access-test-secret".into(),
        refresh_secret: "refresh-test-secret".into(),
        access_token_expiry: 900,
        refresh_token_expiry: 3600,
    });
    let hasher = Argon2Hasher::new(&HasherConfig {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    })
    .unwrap();

    let service = CredentialService::new(
        Stores {
            users: flaky_users.clone(),
            roles: Arc::new(InMemoryRoleRepository::new()),
            reset_tokens: Arc::new(reset_tokens.clone()),
            sessions: Arc::new(sessions.clone()),
        },
        jwt,
        Arc::new(hasher),
        Arc::new(MeteredNotifier::new(notifier.clone(), metrics.clone())),
        audit.clone(),
        metrics,
        ServiceSettings {
            policy: PasswordPolicy::default(),
            reset_token_ttl: Duration::minutes(15),
            max_bot_token: max_bot_token.to_string(),
            max_default_role: RoleName::Operator,
        },
    );

    Harness {
        service,
        users,
        flaky_users,
        reset_tokens,
        sessions,
        notifier,
        audit,
    }
}

fn harness() -> Harness {
    harness_with(BOT_TOKEN)
}

fn register_request(email: &str) -> RegisterRequest {
    RegisterRequest {
        email: Some(email.to_string()),
        password: PASSWORD.to_string(),
        ..Default::default()
    }
}

fn signed_init_data(pairs: &[(&str, &str)], secret: &str) -> String {
    let hash = sign(&data_check_string(pairs.iter().copied()), secret);
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        serializer.append_pair(k, v);
    }
    serializer.append_pair("hash", &hash);
    serializer.finish()
}

#[tokio::test]
async fn register_login_and_validate() {
    let h = harness();

    let session = h
        .service
        .register(RegisterRequest {
            phone: Some("8 (999) 123-45-67".into()),
            email: Some("ignored@example.com".into()),
            password: PASSWORD.into(),
            role: Some("operator".into()),
        })
        .await
        .unwrap();
    assert_eq!(session.user.identifier, "+79991234567");
    assert_eq!(session.user.role, Some(RoleName::Operator));
    assert_eq!(session.tokens.token_type, "Bearer");
    assert_eq!(session.tokens.expires_in, 900);

    let login = h
        .service
        .login_by_phone("+79991234567", PASSWORD)
        .await
        .unwrap();
    let info = h.service.validate_token(&login.tokens.access_token).unwrap();
    assert_eq!(info.user_id, session.user.id);
    assert_eq!(info.identifier, "+79991234567");
    assert_eq!(info.role, Some(RoleName::Operator));
    assert_eq!(info.context, None);

    assert_eq!(h.sessions.active_count(session.user.id).await, 2);
    assert_eq!(h.service.metrics().user_creations, 1);
    assert_eq!(h.audit.names(), vec!["user_created"]);
}

#[tokio::test]
async fn registration_failures_leave_storage_unchanged() {
    let h = harness();

    let weak = RegisterRequest {
        email: Some("anna@example.com".into()),
        password: "short".into(),
        ..Default::default()
    };
    assert!(matches!(
        h.service.register(weak).await,
        Err(AuthError::Validation(_))
    ));

    let anonymous = RegisterRequest {
        password: PASSWORD.into(),
        ..Default::default()
    };
    assert!(matches!(
        h.service.register(anonymous).await,
        Err(AuthError::Validation(_))
    ));

    let unknown_role = RegisterRequest {
        role: Some("janitor".into()),
        ..register_request("anna@example.com")
    };
    assert!(matches!(
        h.service.register(unknown_role).await,
        Err(AuthError::Validation(_))
    ));
    assert_eq!(h.users.count().await, 0);

    h.service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();
    assert!(matches!(
        h.service.register(register_request("Anna@Example.com")).await,
        Err(AuthError::Conflict(_))
    ));
    assert_eq!(h.users.count().await, 1);
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let h = harness();
    h.service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();

    assert!(matches!(
        h.service.login("nobody@example.com", PASSWORD).await,
        Err(AuthError::InvalidCredentials)
    ));
    assert!(matches!(
        h.service.login("anna@example.com", "Wr0ng!Password").await,
        Err(AuthError::InvalidCredentials)
    ));
    assert!(matches!(
        h.service.login_by_identifier("not an identifier", PASSWORD).await,
        Err(AuthError::Validation(_))
    ));
    assert!(h.service.login("anna@example.com", PASSWORD).await.is_ok());
}

#[tokio::test]
async fn refresh_tokens_work_once() {
    let h = harness();
    let session = h
        .service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();
    let first = session.tokens.refresh_token;

    let rotated = h.service.refresh(&first).await.unwrap();
    assert_ne!(rotated.refresh_token, first);
    assert!(matches!(
        h.service.refresh(&first).await,
        Err(AuthError::InvalidOrExpiredSession)
    ));

    let again = h.service.refresh(&rotated.refresh_token).await.unwrap();
    assert!(h.service.validate_token(&again.access_token).is_ok());
    assert_eq!(h.sessions.active_count(session.user.id).await, 1);

    assert!(matches!(
        h.service.refresh("garbage").await,
        Err(AuthError::InvalidOrExpiredSession)
    ));
    assert!(matches!(
        h.service.refresh(&again.access_token).await,
        Err(AuthError::InvalidOrExpiredSession)
    ));
}

#[tokio::test]
async fn logout_ends_every_session() {
    let h = harness();
    let first = h
        .service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();
    let second = h.service.login("anna@example.com", PASSWORD).await.unwrap();

    assert!(matches!(
        h.service.logout("  ").await,
        Err(AuthError::Validation(_))
    ));

    h.service.logout(&first.tokens.refresh_token).await.unwrap();
    assert_eq!(h.sessions.active_count(first.user.id).await, 0);
    assert!(matches!(
        h.service.refresh(&second.tokens.refresh_token).await,
        Err(AuthError::InvalidOrExpiredSession)
    ));
    assert!(matches!(
        h.service.logout(&first.tokens.refresh_token).await,
        Err(AuthError::InvalidOrExpiredSession)
    ));
}

#[tokio::test]
async fn reset_token_is_single_use() {
    let h = harness();
    let session = h
        .service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();

    h.service
        .request_password_reset("anna@example.com")
        .await
        .unwrap();
    let token = h.notifier.last_reset_token();
    assert_eq!(token.len(), RESET_TOKEN_LENGTH);

    let stored = h.reset_tokens.find(&token).await.unwrap().unwrap();
    assert_eq!(stored.user_id, session.user.id);
    assert_eq!(stored.expires_at - stored.created_at, Duration::minutes(15));

    h.service.reset_password(&token, NEW_PASSWORD).await.unwrap();
    assert!(matches!(
        h.service.reset_password(&token, "Yet4nother!Pass").await,
        Err(AuthError::AlreadyUsed)
    ));

    assert!(matches!(
        h.service.login("anna@example.com", PASSWORD).await,
        Err(AuthError::InvalidCredentials)
    ));
    assert!(h.service.login("anna@example.com", NEW_PASSWORD).await.is_ok());
    assert!(matches!(
        h.service.refresh(&session.tokens.refresh_token).await,
        Err(AuthError::InvalidOrExpiredSession)
    ));

    let metrics = h.service.metrics();
    assert_eq!(metrics.tokens_generated, 1);
    assert_eq!(metrics.tokens_used, 1);
    assert_eq!(metrics.tokens_invalidated, 1);
    assert_eq!(metrics.password_resets, 1);
    assert_eq!(
        h.audit.names(),
        vec![
            "user_created",
            "password_reset_requested",
            "password_reset_completed",
            "password_reset_token_reused",
        ]
    );
}

#[tokio::test]
async fn expired_reset_token_is_rejected() {
    let h = harness();
    let session = h
        .service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();

    let created_at = Utc::now() - Duration::minutes(16);
    h.reset_tokens
        .create(&PasswordResetToken {
            token: "expired-token".into(),
            user_id: session.user.id,
            created_at,
            expires_at: created_at + Duration::minutes(15),
            used_at: None,
        })
        .await
        .unwrap();

    assert!(matches!(
        h.service.reset_password("expired-token", NEW_PASSWORD).await,
        Err(AuthError::Expired)
    ));
    assert_eq!(h.service.metrics().tokens_expired, 1);
    assert!(h.audit.names().contains(&"password_reset_token_expired"));
    assert!(h.service.login("anna@example.com", PASSWORD).await.is_ok());
}

#[tokio::test]
async fn failed_password_write_keeps_reset_token_usable() {
    let h = harness();
    let session = h
        .service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();
    h.service
        .request_password_reset("anna@example.com")
        .await
        .unwrap();
    let token = h.notifier.last_reset_token();

    h.flaky_users.fail_password_update.store(true, Ordering::SeqCst);
    let err = h
        .service
        .reset_password(&token, NEW_PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::PermanentInfra(_)));
    assert!(h.reset_tokens.find(&token).await.unwrap().unwrap().used_at.is_none());
    assert!(h.service.login("anna@example.com", PASSWORD).await.is_ok());
    assert_eq!(h.service.metrics().tokens_used, 0);

    h.service.reset_password(&token, NEW_PASSWORD).await.unwrap();
    let relogin = h.service.login("anna@example.com", NEW_PASSWORD).await.unwrap();
    assert_eq!(relogin.user.id, session.user.id);
    assert!(matches!(
        h.service.reset_password(&token, NEW_PASSWORD).await,
        Err(AuthError::AlreadyUsed)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_resets_redeem_the_token_once() {
    let h = harness();
    h.service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();
    h.service
        .request_password_reset("anna@example.com")
        .await
        .unwrap();
    let token = h.notifier.last_reset_token();

    let (a, b) = {
        let (first, second) = (h.service.clone(), h.service.clone());
        let (t1, t2) = (token.clone(), token.clone());
        tokio::join!(
            tokio::spawn(async move { first.reset_password(&t1, NEW_PASSWORD).await }),
            tokio::spawn(async move { second.reset_password(&t2, "Yet4nother!Pass").await }),
        )
    };
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(AuthError::AlreadyUsed)))
            .count(),
        1
    );
    assert_eq!(h.service.metrics().tokens_used, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_refreshes_rotate_once() {
    let h = harness();
    let session = h
        .service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();
    let token = session.tokens.refresh_token;

    let (a, b) = {
        let (first, second) = (h.service.clone(), h.service.clone());
        let (t1, t2) = (token.clone(), token.clone());
        tokio::join!(
            tokio::spawn(async move { first.refresh(&t1).await }),
            tokio::spawn(async move { second.refresh(&t2).await }),
        )
    };
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(AuthError::InvalidOrExpiredSession)))
            .count(),
        1
    );
    assert_eq!(h.sessions.active_count(session.user.id).await, 1);
}

#[tokio::test]
async fn phone_accounts_reset_their_password() {
    let h = harness();
    let session = h
        .service
        .register(RegisterRequest {
            phone: Some("+79991234567".into()),
            password: PASSWORD.into(),
            ..Default::default()
        })
        .await
        .unwrap();

    h.service
        .request_password_reset("+79991234567")
        .await
        .unwrap();
    let (recipient, token) = h.notifier.reset_tokens.lock().unwrap()[0].clone();
    assert_eq!(recipient, Identifier::Phone("+79991234567".into()));

    let stored = h.reset_tokens.find(&token).await.unwrap().unwrap();
    assert_eq!(stored.user_id, session.user.id);
    assert_eq!(stored.expires_at - stored.created_at, Duration::minutes(15));

    h.service
        .reset_password(&token, "NewSecurePass123!")
        .await
        .unwrap();
    assert!(matches!(
        h.service.reset_password(&token, "NewSecurePass123!").await,
        Err(AuthError::AlreadyUsed)
    ));
    assert!(
        h.service
            .login_by_phone("+79991234567", "NewSecurePass123!")
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn weak_reset_password_keeps_token_usable() {
    let h = harness();
    h.service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();
    h.service
        .request_password_reset("anna@example.com")
        .await
        .unwrap();
    let token = h.notifier.last_reset_token();

    assert!(matches!(
        h.service.reset_password(&token, "weakpassword").await,
        Err(AuthError::Validation(_))
    ));
    let stored = h.reset_tokens.find(&token).await.unwrap().unwrap();
    assert!(stored.used_at.is_none());
    assert!(h.service.login("anna@example.com", PASSWORD).await.is_ok());

    h.service.reset_password(&token, NEW_PASSWORD).await.unwrap();

    assert!(matches!(
        h.service.reset_password("no-such-token", NEW_PASSWORD).await,
        Err(AuthError::NotFound(_))
    ));
    assert!(matches!(
        h.service.reset_password("", NEW_PASSWORD).await,
        Err(AuthError::Validation(_))
    ));
}

#[tokio::test]
async fn reset_request_failures() {
    let h = harness();
    assert!(matches!(
        h.service.request_password_reset("nobody@example.com").await,
        Err(AuthError::NotFound(_))
    ));
    assert!(matches!(
        h.service.request_password_reset("???").await,
        Err(AuthError::Validation(_))
    ));

    h.service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();
    h.notifier
        .fail_with(NotificationError::new(PeerStatus::Unavailable, "peer down"));

    let err = h
        .service
        .request_password_reset("anna@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TransientInfra(_)));
    assert!(err.is_infrastructure());

    let metrics = h.service.metrics();
    assert_eq!(metrics.notifications_failed, 1);
    assert_eq!(metrics.password_resets, 0);
}

#[tokio::test]
async fn notification_rates_sum_to_one() {
    let h = harness();
    let snapshot = h.service.metrics();
    assert_eq!(snapshot.notification_success_rate, 1.0);
    assert_eq!(snapshot.notification_failure_rate, 0.0);

    h.service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();
    for _ in 0..3 {
        h.service
            .request_password_reset("anna@example.com")
            .await
            .unwrap();
    }
    h.notifier
        .fail_with(NotificationError::new(PeerStatus::InvalidArgument, "rejected"));
    assert!(
        h.service
            .request_password_reset("anna@example.com")
            .await
            .is_err()
    );

    let snapshot = h.service.metrics();
    assert_eq!(snapshot.notifications_sent, 3);
    assert_eq!(snapshot.notifications_failed, 1);
    assert!((snapshot.notification_success_rate - 0.75).abs() < 1e-9);
    assert!(
        (snapshot.notification_success_rate + snapshot.notification_failure_rate - 1.0).abs()
            < 1e-9
    );
}

#[tokio::test]
async fn change_password_revokes_sessions() {
    let h = harness();
    let session = h
        .service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();
    let user_id = session.user.id;

    assert!(matches!(
        h.service
            .change_password(user_id, "Wr0ng!Password", NEW_PASSWORD)
            .await,
        Err(AuthError::InvalidCredentials)
    ));
    assert!(matches!(
        h.service.change_password(user_id, PASSWORD, "weak").await,
        Err(AuthError::Validation(_))
    ));
    assert!(matches!(
        h.service.change_password(9999, PASSWORD, NEW_PASSWORD).await,
        Err(AuthError::NotFound(_))
    ));
    assert_eq!(h.sessions.active_count(user_id).await, 1);

    h.service
        .change_password(user_id, PASSWORD, NEW_PASSWORD)
        .await
        .unwrap();
    assert_eq!(h.sessions.active_count(user_id).await, 0);
    assert!(matches!(
        h.service.refresh(&session.tokens.refresh_token).await,
        Err(AuthError::InvalidOrExpiredSession)
    ));
    assert!(h.service.login("anna@example.com", NEW_PASSWORD).await.is_ok());
    assert_eq!(h.service.metrics().password_changes, 1);
    assert!(h.audit.names().contains(&"password_changed"));
}

#[tokio::test]
async fn max_sign_in_upserts_one_account() {
    let h = harness();
    let init_data = signed_init_data(
        &[
            ("max_id", "123"),
            ("first_name", "Ivan"),
            ("last_name", "Petrov"),
            ("username", "ivan_p"),
        ],
        BOT_TOKEN,
    );

    let first = h.service.authenticate_max(&init_data).await.unwrap();
    let second = h.service.authenticate_max(&init_data).await.unwrap();
    assert_eq!(first.user.id, second.user.id);
    assert_eq!(first.user.external_id, Some(123));
    assert_eq!(first.user.role, Some(RoleName::Operator));
    assert_eq!(first.user.display_name.as_deref(), Some("Ivan Petrov"));
    assert_eq!(h.users.count().await, 1);
    assert_eq!(h.service.metrics().user_creations, 1);

    let info = h.service.validate_token(&second.tokens.access_token).unwrap();
    assert_eq!(info.identifier, "max:123");
    assert!(h.service.refresh(&first.tokens.refresh_token).await.is_ok());

    assert_eq!(
        h.audit.names(),
        vec![
            "max_user_created",
            "max_authentication_successful",
            "max_user_updated",
            "max_authentication_successful",
        ]
    );
}

#[tokio::test]
async fn max_sign_in_rejects_bad_init_data() {
    let h = harness();
    let forged = signed_init_data(&[("max_id", "123"), ("first_name", "Ivan")], "other-bot");

    match h.service.authenticate_max(&forged).await {
        Err(AuthError::InitData(e)) => assert_eq!(e, InitDataError::HashVerificationFailed),
        other => panic!("unexpected outcome: {:?}", other.map(|s| s.user)),
    }
    assert_eq!(h.users.count().await, 0);
    assert_eq!(h.audit.names(), vec!["max_auth_validation_failed"]);

    let unconfigured = harness_with("");
    let valid = signed_init_data(&[("max_id", "1"), ("first_name", "A")], BOT_TOKEN);
    assert!(matches!(
        unconfigured.service.authenticate_max(&valid).await,
        Err(AuthError::InitData(InitDataError::MissingSecret))
    ));
}

#[tokio::test]
async fn create_user_is_idempotent_and_delivers_generated_password() {
    let h = harness();

    let created = h
        .service
        .create_user("anna@example.com", None, Some("curator"))
        .await
        .unwrap();
    assert!(created.created);

    let (recipient, password) = h.notifier.passwords.lock().unwrap()[0].clone();
    assert_eq!(recipient, Identifier::Email("anna@example.com".into()));
    assert!(PasswordPolicy::default().validate(&password).is_ok());

    let again = h
        .service
        .create_user("anna@example.com", Some(PASSWORD), None)
        .await
        .unwrap();
    assert_eq!(again.user_id, created.user_id);
    assert!(!again.created);
    assert_eq!(h.users.count().await, 1);

    let session = h.service.login("anna@example.com", &password).await.unwrap();
    assert_eq!(session.user.role, Some(RoleName::Curator));
    assert_eq!(h.notifier.passwords.lock().unwrap().len(), 1);

    assert!(matches!(
        h.service
            .create_user("boris@example.com", Some("weak"), None)
            .await,
        Err(AuthError::Validation(_))
    ));
}

#[tokio::test]
async fn roles_scope_tokens_and_revocation() {
    let h = harness();
    let session = h
        .service
        .register(register_request("anna@example.com"))
        .await
        .unwrap();
    let user_id = session.user.id;

    let unit = Scope::new(Some(3), None, None);
    h.service
        .assign_role(user_id, RoleName::Curator, unit)
        .await
        .unwrap();
    h.service
        .assign_role(user_id, RoleName::Curator, unit)
        .await
        .unwrap();

    let permissions = h.service.get_user_permissions(user_id).await.unwrap();
    assert_eq!(permissions.role, Some(RoleName::Curator));
    assert_eq!(permissions.grants.len(), 1);

    let login = h.service.login("anna@example.com", PASSWORD).await.unwrap();
    let info = h.service.validate_token(&login.tokens.access_token).unwrap();
    assert_eq!(info.role, Some(RoleName::Curator));
    assert_eq!(info.context, Some(unit));

    assert!(
        h.service
            .check_permission(user_id, None, &Scope::new(Some(3), Some(8), None))
            .await
            .unwrap()
    );
    assert!(
        !h.service
            .check_permission(user_id, None, &Scope::new(Some(4), None, None))
            .await
            .unwrap()
    );

    assert_eq!(h.service.revoke_user_roles(user_id).await.unwrap(), 1);
    assert_eq!(h.service.get_user(user_id).await.unwrap().role, None);
    assert_eq!(h.sessions.active_count(user_id).await, 0);
    assert!(matches!(
        h.service.refresh(&login.tokens.refresh_token).await,
        Err(AuthError::InvalidOrExpiredSession)
    ));

    assert!(matches!(
        h.service
            .assign_role(9999, RoleName::Operator, Scope::GLOBAL)
            .await,
        Err(AuthError::NotFound(_))
    ));
    assert_eq!(
        h.audit.names(),
        vec!["user_created", "role_assigned", "role_assigned", "roles_revoked"]
    );
}

#[tokio::test]
async fn memory_backend_is_healthy() {
    let h = harness();
    let report = h.service.health().await;
    assert!(report.database);
    assert!(report.sessions);
    assert!(report.is_healthy());
}
