//! Credential service: the operations exposed to the rest of the platform
//!
//! Each operation composes the leaf components (hasher, token issuer,
//! session registry, reset flow, init-data validator, role assigner) over the
//! repositories and returns either a value or an [`AuthError`].

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::audit::{AuditEvent, AuditLog};
use crate::error::{AuthError, AuthResult};
use crate::jwt::{IssuedTokens, JwtService};
use crate::max_auth::InitDataValidator;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::models::{
    Identifier, NewUser, RefreshSession, RoleGrant, RoleGrantView, RoleName, Scope, TokenContext,
    User, UserId, UserView,
};
use crate::notification::Notifier;
use crate::password::{PasswordHasher, generate_password};
use crate::repositories::{ResetTokenRepository, RoleRepository, UserRepository};
use crate::reset::{PasswordResetFlow, RESET_TOKEN_TTL_MINUTES, ResetFlowDeps};
use crate::roles::RoleAssigner;
use crate::session::SessionRegistry;
use crate::validation::PasswordPolicy;

/// Storage the service runs on
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub reset_tokens: Arc<dyn ResetTokenRepository>,
    pub sessions: Arc<dyn SessionRegistry>,
}

/// Tunables of the credential operations
#[derive(Clone)]
pub struct ServiceSettings {
    pub policy: PasswordPolicy,
    pub reset_token_ttl: Duration,
    pub max_bot_token: String,
    pub max_default_role: RoleName,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            policy: PasswordPolicy::default(),
            reset_token_ttl: Duration::minutes(RESET_TOKEN_TTL_MINUTES),
            max_bot_token: String::new(),
            max_default_role: RoleName::Operator,
        }
    }
}

/// Access/refresh pair handed to clients
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Result of a successful sign-in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub user: UserView,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub password: String,
    pub role: Option<String>,
}

/// What a verified access token asserts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub user_id: UserId,
    pub identifier: String,
    pub role: Option<RoleName>,
    pub context: Option<TokenContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedUser {
    pub user_id: UserId,
    /// False when the identifier already belonged to an account
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPermissions {
    pub user_id: UserId,
    pub role: Option<RoleName>,
    pub grants: Vec<RoleGrantView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub database: bool,
    pub sessions: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.database && self.sessions
    }
}

/// Orchestrates every credential operation
#[derive(Clone)]
pub struct CredentialService {
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionRegistry>,
    roles: RoleAssigner,
    reset: PasswordResetFlow,
    hasher: Arc<dyn PasswordHasher>,
    jwt: JwtService,
    validator: InitDataValidator,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLog>,
    metrics: Arc<Metrics>,
    settings: ServiceSettings,
}

impl CredentialService {
    pub fn new(
        stores: Stores,
        jwt: JwtService,
        hasher: Arc<dyn PasswordHasher>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
        metrics: Arc<Metrics>,
        settings: ServiceSettings,
    ) -> Self {
        let reset = PasswordResetFlow::new(
            ResetFlowDeps {
                users: stores.users.clone(),
                tokens: stores.reset_tokens,
                sessions: stores.sessions.clone(),
                hasher: hasher.clone(),
                notifier: notifier.clone(),
                audit: audit.clone(),
                metrics: metrics.clone(),
            },
            settings.policy,
            settings.reset_token_ttl,
        );

        Self {
            users: stores.users,
            sessions: stores.sessions,
            roles: RoleAssigner::new(stores.roles),
            reset,
            hasher,
            jwt,
            validator: InitDataValidator::new(),
            notifier,
            audit,
            metrics,
            settings,
        }
    }

    fn token_pair(&self, issued: IssuedTokens) -> TokenPair {
        TokenPair {
            access_token: issued.access_token,
            refresh_token: issued.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry(),
        }
    }

    async fn issue_for(&self, user: &User) -> AuthResult<IssuedTokens> {
        let context = self.roles.token_context(user.id, user.role).await?;
        Ok(self
            .jwt
            .issue(user.id, &user.identifier, user.role, context.as_ref())?)
    }

    /// Issue a fresh pair and register its refresh session
    async fn start_session(&self, user: &User) -> AuthResult<TokenPair> {
        let issued = self.issue_for(user).await?;
        self.sessions
            .save(&RefreshSession::new(
                issued.refresh_jti,
                user.id,
                issued.refresh_expires_at,
            ))
            .await?;
        Ok(self.token_pair(issued))
    }

    fn non_empty(value: &Option<String>) -> Option<&str> {
        value.as_deref().filter(|s| !s.trim().is_empty())
    }

    fn parse_role(role: Option<&str>) -> AuthResult<Option<RoleName>> {
        role.filter(|r| !r.trim().is_empty())
            .map(|r| r.parse::<RoleName>().map_err(AuthError::Validation))
            .transpose()
    }

    /// Register with a phone or an email; the phone is used when both are given
    pub async fn register(&self, request: RegisterRequest) -> AuthResult<AuthSession> {
        let identifier = match (
            Self::non_empty(&request.phone),
            Self::non_empty(&request.email),
        ) {
            (Some(phone), _) => Identifier::phone(phone),
            (None, Some(email)) => Identifier::email(email),
            (None, None) => return Err(AuthError::validation("Phone or email is required")),
        }
        .map_err(AuthError::Validation)?;

        let role = Self::parse_role(request.role.as_deref())?;
        self.register_identifier(identifier, &request.password, role)
            .await
    }

    /// Register with a single phone-or-email identifier
    pub async fn register_by_identifier(
        &self,
        identifier: &str,
        password: &str,
        role: Option<&str>,
    ) -> AuthResult<AuthSession> {
        let identifier = Identifier::parse(identifier).map_err(AuthError::Validation)?;
        let role = Self::parse_role(role)?;
        self.register_identifier(identifier, password, role).await
    }

    async fn register_identifier(
        &self,
        identifier: Identifier,
        password: &str,
        role: Option<RoleName>,
    ) -> AuthResult<AuthSession> {
        self.settings
            .policy
            .validate(password)
            .map_err(AuthError::Validation)?;

        let password_hash = self.hasher.hash(password)?;
        let user = self
            .users
            .create(&NewUser::with_password(identifier, password_hash, role))
            .await
            .map_err(|e| match AuthError::from(e) {
                AuthError::Conflict(_) => AuthError::Conflict("User already exists".to_string()),
                other => other,
            })?;

        self.metrics.record_user_creation();
        info!("Registered user {} ({})", user.id, user.identifier.masked());
        self.audit
            .record(AuditEvent::UserCreated {
                user_id: user.id,
                role: user.role,
                at: Utc::now(),
            })
            .await;

        let tokens = self.start_session(&user).await?;
        Ok(AuthSession {
            user: UserView::from(&user),
            tokens,
        })
    }

    /// Sign in with a phone or email and a password
    pub async fn login_by_identifier(
        &self,
        identifier: &str,
        password: &str,
    ) -> AuthResult<AuthSession> {
        let identifier = Identifier::parse(identifier).map_err(AuthError::Validation)?;
        self.login_with(identifier, password).await
    }

    pub async fn login(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        let identifier = Identifier::email(email).map_err(AuthError::Validation)?;
        self.login_with(identifier, password).await
    }

    pub async fn login_by_phone(&self, phone: &str, password: &str) -> AuthResult<AuthSession> {
        let identifier = Identifier::phone(phone).map_err(AuthError::Validation)?;
        self.login_with(identifier, password).await
    }

    async fn login_with(&self, identifier: Identifier, password: &str) -> AuthResult<AuthSession> {
        if password.is_empty() {
            return Err(AuthError::validation("Password is required"));
        }

        let user = self
            .users
            .find_by_identifier(&identifier)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let verified = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| self.hasher.verify(password, hash));
        if !verified {
            warn!("Failed login for {}", identifier.masked());
            return Err(AuthError::InvalidCredentials);
        }

        let tokens = self.start_session(&user).await?;
        info!("User {} logged in", user.id);
        Ok(AuthSession {
            user: UserView::from(&user),
            tokens,
        })
    }

    /// Exchange a refresh token for a new pair; the presented token stops working
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let claims = self
            .jwt
            .verify_refresh(refresh_token)
            .map_err(|_| AuthError::InvalidOrExpiredSession)?;

        if !self.sessions.is_valid(claims.jti, claims.sub).await? {
            return Err(AuthError::InvalidOrExpiredSession);
        }

        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::InvalidOrExpiredSession)?;

        let issued = self.issue_for(&user).await?;
        let next = RefreshSession::new(issued.refresh_jti, user.id, issued.refresh_expires_at);
        if !self.sessions.rotate(claims.jti, &next).await? {
            warn!("Refresh token of user {} was rotated concurrently", user.id);
            return Err(AuthError::InvalidOrExpiredSession);
        }

        Ok(self.token_pair(issued))
    }

    /// End every session of the token's owner
    pub async fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::validation("Refresh token is required"));
        }

        let claims = self
            .jwt
            .verify_refresh(refresh_token)
            .map_err(|_| AuthError::InvalidOrExpiredSession)?;
        if !self.sessions.is_valid(claims.jti, claims.sub).await? {
            return Err(AuthError::InvalidOrExpiredSession);
        }

        let revoked = self.sessions.revoke_all(claims.sub).await?;
        info!("User {} logged out, {} sessions revoked", claims.sub, revoked);
        Ok(())
    }

    /// Sign in with MAX Mini-App init-data, provisioning the account on first sight
    pub async fn authenticate_max(&self, init_data: &str) -> AuthResult<AuthSession> {
        let profile = match self
            .validator
            .validate(init_data, &self.settings.max_bot_token)
        {
            Ok(profile) => profile,
            Err(e) => {
                warn!("MAX init-data rejected: {}", e);
                self.audit
                    .record(AuditEvent::MaxAuthValidationFailed {
                        error_class: e.kind(),
                        at: Utc::now(),
                    })
                    .await;
                return Err(e.into());
            }
        };

        let (user, created) = match self
            .users
            .upsert_external(&profile.to_account(), Some(self.settings.max_default_role))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                let e = AuthError::from(e);
                error!("MAX user upsert failed: {}", e);
                self.audit
                    .record(AuditEvent::MaxUserUpsertFailed {
                        error_class: e.kind(),
                        at: Utc::now(),
                    })
                    .await;
                return Err(e);
            }
        };

        let username = user.username.clone().unwrap_or_default();
        let event = if created {
            self.metrics.record_user_creation();
            AuditEvent::MaxUserCreated {
                user_id: user.id,
                external_id: profile.external_id,
                username: username.clone(),
                at: Utc::now(),
            }
        } else {
            AuditEvent::MaxUserUpdated {
                user_id: user.id,
                external_id: profile.external_id,
                username: username.clone(),
                at: Utc::now(),
            }
        };
        self.audit.record(event).await;

        let issued = match self.issue_for(&user).await {
            Ok(issued) => issued,
            Err(e) => {
                error!("Token issuance for MAX user {} failed: {}", user.id, e);
                self.audit
                    .record(AuditEvent::MaxJwtGenerationFailed {
                        error_class: e.kind(),
                        at: Utc::now(),
                    })
                    .await;
                return Err(e);
            }
        };

        let session = RefreshSession::new(issued.refresh_jti, user.id, issued.refresh_expires_at);
        if let Err(e) = self.sessions.save(&session).await {
            let e = AuthError::from(e);
            error!("Saving refresh session of MAX user {} failed: {}", user.id, e);
            self.audit
                .record(AuditEvent::MaxRefreshTokenSaveFailed {
                    error_class: e.kind(),
                    at: Utc::now(),
                })
                .await;
            return Err(e);
        }

        self.audit
            .record(AuditEvent::MaxAuthenticationSuccessful {
                user_id: user.id,
                external_id: profile.external_id,
                username,
                at: Utc::now(),
            })
            .await;

        Ok(AuthSession {
            user: UserView::from(&user),
            tokens: self.token_pair(issued),
        })
    }

    pub fn validate_token(&self, access_token: &str) -> AuthResult<TokenInfo> {
        let claims = self.jwt.verify_access(access_token)?;
        Ok(TokenInfo {
            user_id: claims.sub,
            identifier: claims.identifier.clone(),
            role: claims.role,
            context: claims.context(),
        })
    }

    /// Provision an account without signing it in
    ///
    /// Idempotent per identifier. Without a password a compliant one is
    /// generated and sent to the user.
    pub async fn create_user(
        &self,
        identifier: &str,
        password: Option<&str>,
        role: Option<&str>,
    ) -> AuthResult<CreatedUser> {
        let identifier = Identifier::parse(identifier).map_err(AuthError::Validation)?;
        let role = Self::parse_role(role)?;

        if let Some(existing) = self.users.find_by_identifier(&identifier).await? {
            return Ok(CreatedUser {
                user_id: existing.id,
                created: false,
            });
        }

        let (password, generated) = match password.filter(|p| !p.is_empty()) {
            Some(p) => {
                self.settings
                    .policy
                    .validate(p)
                    .map_err(AuthError::Validation)?;
                (p.to_string(), false)
            }
            None => (generate_password(self.settings.policy.min_length), true),
        };

        let password_hash = self.hasher.hash(&password)?;
        let user = match self
            .users
            .create(&NewUser::with_password(identifier.clone(), password_hash, role))
            .await
        {
            Ok(user) => user,
            // lost a race against a concurrent create of the same identifier
            Err(common::StoreError::Conflict(_)) => {
                let existing = self
                    .users
                    .find_by_identifier(&identifier)
                    .await?
                    .ok_or_else(|| AuthError::Conflict("User already exists".to_string()))?;
                return Ok(CreatedUser {
                    user_id: existing.id,
                    created: false,
                });
            }
            Err(e) => return Err(e.into()),
        };

        self.metrics.record_user_creation();
        info!("Provisioned user {} ({})", user.id, identifier.masked());
        self.audit
            .record(AuditEvent::UserCreated {
                user_id: user.id,
                role: user.role,
                at: Utc::now(),
            })
            .await;

        if generated {
            self.notifier.send_password(&identifier, &password).await?;
        }

        Ok(CreatedUser {
            user_id: user.id,
            created: true,
        })
    }

    async fn existing_user(&self, user_id: UserId) -> AuthResult<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound("user"))
    }

    /// Grant a role within a scope and make it the user's primary role
    pub async fn assign_role(
        &self,
        user_id: UserId,
        role: RoleName,
        scope: Scope,
    ) -> AuthResult<RoleGrant> {
        self.existing_user(user_id).await?;

        let grant = self.roles.assign(user_id, role, scope).await?;
        self.users.set_role(user_id, Some(role)).await?;

        self.audit
            .record(AuditEvent::RoleAssigned {
                user_id,
                role,
                scope: scope.label(),
                at: Utc::now(),
            })
            .await;
        Ok(grant)
    }

    /// Remove every grant and end every session of the user
    pub async fn revoke_user_roles(&self, user_id: UserId) -> AuthResult<u64> {
        self.existing_user(user_id).await?;

        let removed = self.roles.revoke_all(user_id).await?;
        self.users.set_role(user_id, None).await?;
        self.sessions.revoke_all(user_id).await?;

        self.audit
            .record(AuditEvent::RolesRevoked {
                user_id,
                grants_removed: removed,
                at: Utc::now(),
            })
            .await;
        Ok(removed)
    }

    pub async fn request_password_reset(&self, identifier: &str) -> AuthResult<()> {
        self.reset.request_reset(identifier).await
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        self.reset.reset(token, new_password).await.map(|_| ())
    }

    pub async fn change_password(
        &self,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let user = self.existing_user(user_id).await?;

        let verified = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| self.hasher.verify(current_password, hash));
        if !verified {
            return Err(AuthError::InvalidCredentials);
        }

        self.settings
            .policy
            .validate(new_password)
            .map_err(AuthError::Validation)?;

        let password_hash = self.hasher.hash(new_password)?;
        if !self.users.update_password(user_id, &password_hash).await? {
            return Err(AuthError::NotFound("user"));
        }

        let revoked = self.sessions.revoke_all(user_id).await?;
        self.metrics.record_password_change();
        info!(
            "Password changed for user {}, {} sessions revoked",
            user_id, revoked
        );
        self.audit
            .record(AuditEvent::PasswordChanged {
                user_id,
                at: Utc::now(),
            })
            .await;
        Ok(())
    }

    pub async fn get_user(&self, user_id: UserId) -> AuthResult<UserView> {
        Ok(UserView::from(&self.existing_user(user_id).await?))
    }

    pub async fn get_user_permissions(&self, user_id: UserId) -> AuthResult<UserPermissions> {
        let user = self.existing_user(user_id).await?;
        let grants = self.roles.list(user_id).await?;
        Ok(UserPermissions {
            user_id,
            role: user.role,
            grants: grants.iter().map(RoleGrantView::from).collect(),
        })
    }

    /// Whether any grant of the user reaches `target`
    pub async fn check_permission(
        &self,
        user_id: UserId,
        role: Option<RoleName>,
        target: &Scope,
    ) -> AuthResult<bool> {
        Ok(self.roles.permits(user_id, role, target).await?)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn health(&self) -> HealthReport {
        let database = self.users.ping().await.unwrap_or_else(|e| {
            error!("Database health check failed: {}", e);
            false
        });
        let sessions = self.sessions.ping().await.unwrap_or_else(|e| {
            error!("Session store health check failed: {}", e);
            false
        });
        HealthReport { database, sessions }
    }
}
