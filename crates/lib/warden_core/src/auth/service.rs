//! Authentication flows: register, login, refresh, logout, verification and reset.
//!
//! [`AuthService`] composes the credential, token, session and verification
//! components over an explicitly passed store handle. Every state change is
//! audited through the asynchronous [`AuditRecorder`].

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::jwt::{AccessGrant, TokenCodec};
use super::password::{hash_password, verify_password};
use super::{
    AuthError, ROLE_SUBSCRIBER_ADMIN, ROLE_SUBSCRIBER_MEMBER, normalize_email, sessions,
    validate_email, validate_password, verification,
};
use crate::audit::AuditRecorder;
use crate::mail::{Mailer, templates};
use crate::models::{AccessClaims, ClientMeta, NewUser, User, VerificationTokenType};
use crate::store::{AuthStore, NewAuditLog};

/// Minimum length of first and last names.
pub const MIN_NAME_LEN: usize = 2;

/// Input to [`AuthService::register`].
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub invite_id: Option<Uuid>,
}

/// Result of a successful registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    pub roles: Vec<String>,
    pub device_id: Uuid,
}

/// Access + refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// Result of a login or refresh.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user: User,
    pub roles: Vec<String>,
    pub tokens: TokenPair,
    pub session_id: Uuid,
    pub device_id: Option<Uuid>,
}

/// Who performed an administrative action, taken from their access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditActor {
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
}

impl AuditActor {
    pub fn from_claims(claims: &AccessClaims) -> Option<Self> {
        Some(Self {
            user_id: claims.user_id()?,
            session_id: claims.session_id(),
            device_id: claims.device_id(),
        })
    }

    /// Audit entry attributed to this actor.
    pub fn entry(&self, action: impl Into<String>, client: &ClientMeta) -> NewAuditLog {
        NewAuditLog::new(action)
            .user(self.user_id)
            .session(self.session_id)
            .device(self.device_id)
            .client(client)
    }
}

/// Auth orchestrator.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    codec: TokenCodec,
    mailer: Arc<dyn Mailer>,
    audit: AuditRecorder,
    app_base_url: String,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("codec", &self.codec)
            .field("app_base_url", &self.app_base_url)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        codec: TokenCodec,
        mailer: Arc<dyn Mailer>,
        audit: AuditRecorder,
        app_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            codec,
            mailer,
            audit,
            app_base_url: app_base_url.into(),
        }
    }

    pub fn store(&self) -> &dyn AuthStore {
        &*self.store
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    /// Create an account, assign its role and send the verification email.
    ///
    /// A valid, unconsumed invite yields `subscriber_member`; no invite yields
    /// `subscriber_admin`. The user is committed before the email is sent, so
    /// a [`AuthError::Delivery`] failure still leaves the account in place.
    pub async fn register(
        &self,
        input: RegisterInput,
        client: &ClientMeta,
    ) -> Result<Registration, AuthError> {
        let first_name = validate_name("First name", &input.first_name)?;
        let last_name = validate_name("Last name", &input.last_name)?;
        let email = normalize_email(&input.email);
        validate_email(&email)?;
        validate_password(&input.password)?;

        if self.store.find_active_user_by_email(&email).await?.is_some() {
            return Err(AuthError::Conflict("Email is already registered".into()));
        }

        if let Some(invite_id) = input.invite_id {
            let invite = self
                .store
                .get_invite(invite_id)
                .await?
                .filter(|i| !i.is_consumed())
                .ok_or(AuthError::InvalidInvite)?;
            if let Some(invited) = invite.email.as_deref()
                && normalize_email(invited) != email
            {
                return Err(AuthError::InvalidInvite);
            }
        }

        let role = if input.invite_id.is_some() {
            ROLE_SUBSCRIBER_MEMBER
        } else {
            ROLE_SUBSCRIBER_ADMIN
        };

        let user = self
            .store
            .create_user(
                &NewUser {
                    first_name,
                    last_name,
                    email,
                    password_hash: hash_password(&input.password)?,
                    is_email_verified: false,
                },
                input.invite_id,
                &[role],
            )
            .await?;

        let device = self
            .store
            .upsert_device(user.id, client.device_name(), client.ip_address.as_deref())
            .await?;

        let token =
            verification::issue(&*self.store, user.id, VerificationTokenType::EmailVerification)
                .await?;
        self.mailer
            .send(&templates::verification_email(&user, &self.app_base_url, &token))
            .await?;

        let action = if input.invite_id.is_some() {
            "User registered via invite"
        } else {
            "User registered"
        };
        self.audit.record(
            NewAuditLog::new(action)
                .user(user.id)
                .device(Some(device.id))
                .client(client),
        );
        info!(user_id = %user.id, role, "user registered");

        Ok(Registration {
            user,
            roles: vec![role.to_string()],
            device_id: device.id,
        })
    }

    /// Authenticate with email and password and open a session.
    ///
    /// Unknown email and wrong password fail identically.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientMeta,
    ) -> Result<Authenticated, AuthError> {
        let email = normalize_email(email);
        let Some(found) = self.store.find_active_user_by_email(&email).await? else {
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(password, &found.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        let user = found.user;
        if !user.is_email_verified {
            return Err(AuthError::EmailNotVerified);
        }

        let device = self
            .store
            .upsert_device(user.id, client.device_name(), client.ip_address.as_deref())
            .await?;
        let roles = self.store.user_role_names(user.id).await?;

        let refresh_token = self.codec.sign_refresh(user.id)?;
        let session = sessions::create(
            &*self.store,
            user.id,
            Some(device.id),
            &refresh_token,
            self.codec.refresh_ttl(),
        )
        .await?;
        let tokens = self.token_pair(&user, &roles, session.id, Some(device.id), refresh_token)?;

        self.audit.record(
            NewAuditLog::new("User logged in")
                .user(user.id)
                .session(Some(session.id))
                .device(Some(device.id))
                .client(client),
        );
        info!(user_id = %user.id, session_id = %session.id, "user logged in");

        Ok(Authenticated {
            user,
            roles,
            tokens,
            session_id: session.id,
            device_id: Some(device.id),
        })
    }

    /// Exchange a refresh token for a new pair, rotating the session.
    ///
    /// The presented token is single-use: once rotated it matches no session.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: &ClientMeta,
    ) -> Result<Authenticated, AuthError> {
        let claims = self.codec.verify_refresh(refresh_token)?;

        let session = sessions::find_by_token(&*self.store, refresh_token)
            .await?
            .filter(|s| s.is_active())
            .ok_or(AuthError::SessionInvalid)?;
        if claims.sub != session.user_id.to_string() {
            warn!(session_id = %session.id, "refresh token subject does not match session owner");
            return Err(AuthError::SessionInvalid);
        }

        let user = self
            .store
            .find_active_user(session.user_id)
            .await?
            .ok_or(AuthError::SessionInvalid)?
            .user;

        let new_refresh = self.codec.sign_refresh(user.id)?;
        let rotated = sessions::rotate(
            &*self.store,
            refresh_token,
            &new_refresh,
            self.codec.refresh_ttl(),
        )
        .await?;

        let roles = self.store.user_role_names(user.id).await?;
        let tokens = self.token_pair(&user, &roles, rotated.id, rotated.device_id, new_refresh)?;

        self.audit.record(
            NewAuditLog::new("Token refreshed")
                .user(user.id)
                .session(Some(rotated.id))
                .device(rotated.device_id)
                .client(client),
        );

        Ok(Authenticated {
            user,
            roles,
            tokens,
            session_id: rotated.id,
            device_id: rotated.device_id,
        })
    }

    /// Revoke the session behind `refresh_token`.
    pub async fn logout(&self, refresh_token: &str, client: &ClientMeta) -> Result<(), AuthError> {
        self.codec.verify_refresh(refresh_token)?;
        let session = sessions::revoke(&*self.store, refresh_token).await?;
        self.audit.record(
            NewAuditLog::new("User logged out")
                .user(session.user_id)
                .session(Some(session.id))
                .device(session.device_id)
                .client(client),
        );
        Ok(())
    }

    /// Revoke every session of the token's subject. Returns how many were
    /// revoked; zero is a success.
    pub async fn logout_all(
        &self,
        refresh_token: &str,
        client: &ClientMeta,
    ) -> Result<usize, AuthError> {
        let claims = self.codec.verify_refresh(refresh_token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;

        let revoked = sessions::revoke_all_for_user(&*self.store, user_id).await?;
        for session in &revoked {
            self.audit.record(
                NewAuditLog::new("Session revoked (logout all)")
                    .user(user_id)
                    .session(Some(session.id))
                    .device(session.device_id)
                    .client(client),
            );
        }
        self.audit.record(
            NewAuditLog::new(format!(
                "User logged out from all devices ({} sessions)",
                revoked.len()
            ))
            .user(user_id)
            .client(client),
        );
        Ok(revoked.len())
    }

    /// Consume an email verification token and mark its owner verified.
    pub async fn verify_email(&self, token: &str, client: &ClientMeta) -> Result<User, AuthError> {
        let user_id =
            verification::consume(&*self.store, token, VerificationTokenType::EmailVerification)
                .await?;
        if !self.store.mark_email_verified(user_id).await? {
            return Err(AuthError::TokenInvalid);
        }
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        self.audit
            .record(NewAuditLog::new("Email verified").user(user_id).client(client));
        Ok(user)
    }

    /// Reissue and resend the verification email. Succeeds whatever the
    /// account state, so callers cannot probe for registered addresses.
    pub async fn resend_verification(
        &self,
        email: &str,
        client: &ClientMeta,
    ) -> Result<(), AuthError> {
        let email = normalize_email(email);
        validate_email(&email)?;
        let Some(found) = self.store.find_active_user_by_email(&email).await? else {
            return Ok(());
        };
        let user = found.user;
        if user.is_email_verified {
            return Ok(());
        }

        let token =
            verification::issue(&*self.store, user.id, VerificationTokenType::EmailVerification)
                .await?;
        let mail = templates::verification_email(&user, &self.app_base_url, &token);
        if let Err(e) = self.mailer.send(&mail).await {
            warn!(user_id = %user.id, "verification email not delivered: {e}");
        }
        self.audit.record(
            NewAuditLog::new("Verification email resent")
                .user(user.id)
                .client(client),
        );
        Ok(())
    }

    /// Send a password reset link. Same response whether or not the account exists.
    pub async fn forgot_password(&self, email: &str, client: &ClientMeta) -> Result<(), AuthError> {
        let email = normalize_email(email);
        validate_email(&email)?;
        let Some(found) = self.store.find_active_user_by_email(&email).await? else {
            return Ok(());
        };
        let user = found.user;

        let token =
            verification::issue(&*self.store, user.id, VerificationTokenType::PasswordReset)
                .await?;
        let mail = templates::password_reset_email(&user, &self.app_base_url, &token);
        if let Err(e) = self.mailer.send(&mail).await {
            warn!(user_id = %user.id, "password reset email not delivered: {e}");
        }
        self.audit.record(
            NewAuditLog::new("Password reset requested")
                .user(user.id)
                .client(client),
        );
        Ok(())
    }

    /// Consume a reset token, set the new password and revoke every session.
    ///
    /// Returns the number of sessions revoked.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        client: &ClientMeta,
    ) -> Result<usize, AuthError> {
        validate_password(new_password)?;
        let user_id =
            verification::consume(&*self.store, token, VerificationTokenType::PasswordReset)
                .await?;
        if !self
            .store
            .set_password_hash(user_id, &hash_password(new_password)?)
            .await?
        {
            return Err(AuthError::TokenInvalid);
        }
        let revoked = sessions::revoke_all_for_user(&*self.store, user_id).await?;
        self.audit
            .record(NewAuditLog::new("Password reset").user(user_id).client(client));
        info!(%user_id, sessions = revoked.len(), "password reset");
        Ok(revoked.len())
    }

    /// Change the caller's password after re-checking the current one.
    pub async fn change_password(
        &self,
        actor: &AuditActor,
        current_password: &str,
        new_password: &str,
        client: &ClientMeta,
    ) -> Result<(), AuthError> {
        let found = self
            .store
            .find_active_user(actor.user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User not found".into()))?;
        if !verify_password(current_password, &found.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        validate_password(new_password)?;
        self.store
            .set_password_hash(actor.user_id, &hash_password(new_password)?)
            .await?;
        self.audit
            .record(actor.entry("User changed password", client));
        Ok(())
    }

    /// Soft-delete a user and invalidate everything they hold: sessions and
    /// pending verification/reset tokens. Returns the sessions revoked.
    pub async fn soft_delete_user(
        &self,
        actor: &AuditActor,
        user_id: Uuid,
        client: &ClientMeta,
    ) -> Result<usize, AuthError> {
        if !self.store.soft_delete_user(user_id).await? {
            return Err(AuthError::NotFound("User not found".into()));
        }
        let revoked = sessions::revoke_all_for_user(&*self.store, user_id).await?;
        let tokens = self.store.delete_verification_tokens_for_user(user_id).await?;
        self.audit
            .record(actor.entry(format!("Admin deleted user {user_id}"), client));
        info!(%user_id, actor = %actor.user_id, sessions = revoked.len(), tokens, "user soft-deleted");
        Ok(revoked.len())
    }

    fn token_pair(
        &self,
        user: &User,
        roles: &[String],
        session_id: Uuid,
        device_id: Option<Uuid>,
        refresh_token: String,
    ) -> Result<TokenPair, AuthError> {
        let access_token = self.codec.sign_access(&AccessGrant {
            user_id: user.id,
            roles,
            session_id: Some(session_id),
            device_id,
        })?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.codec.access_ttl().num_seconds(),
        })
    }
}

/// Trim and length-check a name field.
pub fn validate_name(field: &str, value: &str) -> Result<String, AuthError> {
    let value = value.trim();
    if value.chars().count() < MIN_NAME_LEN {
        return Err(AuthError::Validation(format!(
            "{field} must be at least {MIN_NAME_LEN} characters"
        )));
    }
    Ok(value.to_string())
}
