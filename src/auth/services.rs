use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, LoginRequest, LoginResponse, PublicUser, RegisterRequest,
            RegisterResponse, SuccessResponse, VerifyTokenResponse,
        },
        jwt::JwtKeys,
        password::{hash_password, verify_dummy, verify_password},
        repo::{StoreError, UserStore},
        repo_types::{NewUser, User},
    },
    error::AppError,
};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MIN_FULL_NAME_LEN: usize = 2;

const BAD_CREDENTIALS: &str = "Invalid email or password";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Length in UTF-16 code units, the unit browsers count in form validation.
fn text_len(s: &str) -> usize {
    s.encode_utf16().count()
}

fn long_enough(password: &str) -> bool {
    text_len(password) >= MIN_PASSWORD_LEN
}

pub async fn register(
    store: &dyn UserStore,
    req: RegisterRequest,
) -> Result<RegisterResponse, AppError> {
    if !is_valid_email(&req.email) {
        warn!(email = %req.email, "invalid email");
        return Err(AppError::InvalidArgument("Valid email is required".into()));
    }

    if !long_enough(&req.password) {
        warn!("password too short");
        return Err(AppError::InvalidArgument(
            "Password must be at least 8 characters".into(),
        ));
    }

    if text_len(req.full_name.trim()) < MIN_FULL_NAME_LEN {
        return Err(AppError::InvalidArgument(
            "Full name must be at least 2 characters".into(),
        ));
    }

    // fast path only, the unique index decides
    if store.find_by_email(&req.email).await?.is_some() {
        warn!(email = %req.email, "email already registered");
        return Err(AppError::AlreadyExists(
            "User with this email already exists".into(),
        ));
    }

    let password_hash = hash_password(&req.password)?;
    let new_user = NewUser {
        email: req.email,
        password_hash,
        role: req.role.unwrap_or_default(),
        full_name: req.full_name,
    };
    let email = new_user.email.clone();

    let user_id = match store.create(new_user).await {
        Ok(id) => id,
        Err(StoreError::EmailTaken) => {
            warn!(email = %email, "email registered concurrently");
            return Err(AppError::AlreadyExists(
                "User with this email already exists".into(),
            ));
        }
        Err(StoreError::Other(e)) => return Err(AppError::Internal(e)),
    };

    info!(user_id, email = %email, "user registered");
    Ok(RegisterResponse {
        success: true,
        user_id,
    })
}

pub async fn login(
    store: &dyn UserStore,
    keys: &JwtKeys,
    req: LoginRequest,
) -> Result<LoginResponse, AppError> {
    if req.email.is_empty() || req.password.is_empty() {
        return Err(AppError::InvalidArgument(
            "Email and password are required".into(),
        ));
    }

    let user = match store.find_by_email(&req.email).await? {
        Some(u) => u,
        None => {
            verify_dummy(&req.password);
            warn!(email = %req.email, "login unknown email");
            return Err(AppError::Unauthenticated(BAD_CREDENTIALS.into()));
        }
    };

    if !user.is_active {
        warn!(user_id = user.id, "login on disabled account");
        return Err(AppError::PermissionDenied("User account is disabled".into()));
    }

    if !verify_password(&req.password, &user.password_hash)? {
        warn!(user_id = user.id, "login invalid password");
        return Err(AppError::Unauthenticated(BAD_CREDENTIALS.into()));
    }

    store.record_login(user.id).await?;
    let token = keys.sign(&user)?;

    info!(user_id = user.id, email = %user.email, "user logged in");
    Ok(LoginResponse {
        token,
        user: user.into(),
    })
}

/// Never fails: every rejection collapses into `{valid: false}`.
pub async fn verify_token(
    store: &dyn UserStore,
    keys: &JwtKeys,
    token: &str,
) -> VerifyTokenResponse {
    let claims = match keys.verify(token) {
        Ok(c) => c,
        Err(_) => return VerifyTokenResponse::invalid(),
    };

    match active_user(store, claims.user_id).await {
        Ok(Some(user)) => VerifyTokenResponse {
            valid: true,
            user: Some(user.into()),
        },
        Ok(None) => VerifyTokenResponse::invalid(),
        Err(e) => {
            error!(error = %e, user_id = claims.user_id, "verify_token lookup failed");
            VerifyTokenResponse::invalid()
        }
    }
}

pub async fn change_password(
    store: &dyn UserStore,
    req: ChangePasswordRequest,
) -> Result<SuccessResponse, AppError> {
    if !long_enough(&req.new_password) {
        return Err(AppError::InvalidArgument(
            "New password must be at least 8 characters".into(),
        ));
    }

    let user = store
        .find_by_id(req.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    if !verify_password(&req.current_password, &user.password_hash)? {
        warn!(user_id = user.id, "change_password wrong current password");
        return Err(AppError::Unauthenticated(
            "Current password is incorrect".into(),
        ));
    }

    let password_hash = hash_password(&req.new_password)?;
    store.update_password_hash(user.id, &password_hash).await?;

    info!(user_id = user.id, "password changed");
    Ok(SuccessResponse { success: true })
}

/// Profile of the account behind an already verified token.
pub async fn profile(store: &dyn UserStore, user_id: i64) -> Result<PublicUser, AppError> {
    active_user(store, user_id)
        .await?
        .map(PublicUser::from)
        .ok_or_else(|| AppError::Unauthenticated("Invalid or expired token".into()))
}

/// A signature alone is not enough: the account must still exist and be enabled.
async fn active_user(store: &dyn UserStore, user_id: i64) -> anyhow::Result<Option<User>> {
    Ok(store.find_by_id(user_id).await?.filter(|u| u.is_active))
}

#[cfg(test)]
mod tests {
    use time::{Duration as TimeDuration, OffsetDateTime};

    use super::*;
    use crate::{
        auth::{repo::MemoryUserStore, repo_types::Role},
        config::{JwtConfig, DEFAULT_TOKEN_TTL_MINUTES},
    };

    fn keys() -> JwtKeys {
        JwtKeys::new(&JwtConfig {
            secret: "test-secret".into(),
            issuer: "test".into(),
            audience: "test".into(),
            ttl_minutes: DEFAULT_TOKEN_TTL_MINUTES,
        })
    }

    fn register_req(email: &str, password: &str, full_name: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: password.into(),
            full_name: full_name.into(),
            role: None,
        }
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@b.com"));
        assert!(is_valid_email("first.last+tag@clinic.example.org"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("ab.com"));
        assert!(!is_valid_email("a b@c.com"));
        assert!(!is_valid_email(""));
    }

    #[tokio::test]
    async fn register_then_login_returns_public_user() {
        let store = MemoryUserStore::default();
        let keys = keys();

        let reg = register(&store, register_req("a@b.com", "longenough1", "Jane Doe"))
            .await
            .unwrap();
        assert!(reg.success);

        let res = login(&store, &keys, login_req("a@b.com", "longenough1"))
            .await
            .unwrap();
        assert!(!res.token.is_empty());
        assert_eq!(
            res.user,
            PublicUser {
                id: reg.user_id,
                email: "a@b.com".into(),
                role: Role::Staff,
                full_name: "Jane Doe".into(),
            }
        );

        let verified = verify_token(&store, &keys, &res.token).await;
        assert!(verified.valid);
        assert_eq!(verified.user, Some(res.user));
    }

    #[tokio::test]
    async fn register_keeps_requested_role_and_name() {
        let store = MemoryUserStore::default();
        let mut req = register_req("admin@clinic.com", "longenough1", "  Dr. Who  ");
        req.role = Some(Role::Admin);
        let reg = register(&store, req).await.unwrap();

        let user = store.find_by_id(reg.user_id).await.unwrap().unwrap();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.full_name, "  Dr. Who  ");
        assert!(user.is_active);
        assert_ne!(user.password_hash, "longenough1");
    }

    #[test]
    fn lengths_count_utf16_units() {
        // four emoji are eight UTF-16 units
        assert!(long_enough("\u{1F600}\u{1F600}\u{1F600}\u{1F600}"));
        assert!(!long_enough("\u{1F600}\u{1F600}\u{1F600}"));
        assert!(long_enough("abcdefgh"));
        assert!(!long_enough("abcdefg"));
        assert_eq!(text_len("\u{1F600}"), 2);
    }

    /// Empty on lookup, but the insert hits the unique index, as when two
    /// registrations for one email run concurrently.
    struct ConcurrentInsertStore;

    #[async_trait::async_trait]
    impl UserStore for ConcurrentInsertStore {
        async fn find_by_email(&self, _email: &str) -> anyhow::Result<Option<User>> {
            Ok(None)
        }
        async fn find_by_id(&self, _id: i64) -> anyhow::Result<Option<User>> {
            Ok(None)
        }
        async fn create(&self, _new_user: NewUser) -> Result<i64, StoreError> {
            Err(StoreError::EmailTaken)
        }
        async fn record_login(&self, _id: i64) -> anyhow::Result<()> {
            Ok(())
        }
        async fn update_password_hash(&self, _id: i64, _hash: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn set_active(&self, _id: i64, _active: bool) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unique_violation_on_insert_is_already_exists() {
        let err = register(
            &ConcurrentInsertStore,
            register_req("a@b.com", "longenough1", "Jane Doe"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)), "{err:?}");
    }

    #[tokio::test]
    async fn register_validates_input() {
        let store = MemoryUserStore::default();
        for req in [
            register_req("not-an-email", "longenough1", "Jane Doe"),
            register_req("a@b.com", "short", "Jane Doe"),
            register_req("a@b.com", "longenough1", " J "),
        ] {
            let err = register(&store, req).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidArgument(_)), "{err:?}");
        }
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let store = MemoryUserStore::default();
        register(&store, register_req("a@b.com", "longenough1", "Jane Doe"))
            .await
            .unwrap();
        let err = register(&store, register_req("a@b.com", "otherpass1", "John Doe"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
        assert_eq!(store.len(), 1);

        // original credentials untouched
        login(&store, &keys(), login_req("a@b.com", "longenough1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn login_requires_both_fields() {
        let store = MemoryUserStore::default();
        let err = login(&store, &keys(), login_req("", "longenough1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
        let err = login(&store, &keys(), login_req("a@b.com", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let store = MemoryUserStore::default();
        register(&store, register_req("a@b.com", "longenough1", "Jane Doe"))
            .await
            .unwrap();

        let unknown = login(&store, &keys(), login_req("nobody@b.com", "longenough1"))
            .await
            .unwrap_err();
        let wrong = login(&store, &keys(), login_req("a@b.com", "wrong1234"))
            .await
            .unwrap_err();

        assert!(matches!(unknown, AppError::Unauthenticated(_)));
        assert!(matches!(wrong, AppError::Unauthenticated(_)));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn login_updates_last_login() {
        let store = MemoryUserStore::default();
        let reg = register(&store, register_req("a@b.com", "longenough1", "Jane Doe"))
            .await
            .unwrap();
        assert!(store.find_by_id(reg.user_id).await.unwrap().unwrap().last_login.is_none());

        login(&store, &keys(), login_req("a@b.com", "longenough1"))
            .await
            .unwrap();
        assert!(store.find_by_id(reg.user_id).await.unwrap().unwrap().last_login.is_some());
    }

    #[tokio::test]
    async fn disabled_account_cannot_log_in() {
        let store = MemoryUserStore::default();
        let reg = register(&store, register_req("a@b.com", "longenough1", "Jane Doe"))
            .await
            .unwrap();
        store.set_active(reg.user_id, false).await.unwrap();

        let err = login(&store, &keys(), login_req("a@b.com", "longenough1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn token_of_deactivated_user_is_rejected() {
        let store = MemoryUserStore::default();
        let keys = keys();
        let reg = register(&store, register_req("a@b.com", "longenough1", "Jane Doe"))
            .await
            .unwrap();
        let res = login(&store, &keys, login_req("a@b.com", "longenough1"))
            .await
            .unwrap();
        assert!(keys.verify(&res.token).is_ok());

        store.set_active(reg.user_id, false).await.unwrap();

        let verified = verify_token(&store, &keys, &res.token).await;
        assert!(!verified.valid);
        assert!(verified.user.is_none());
    }

    #[tokio::test]
    async fn token_of_missing_user_is_rejected() {
        let store = MemoryUserStore::default();
        let keys = keys();
        let ghost = User {
            id: 99,
            email: "ghost@b.com".into(),
            password_hash: String::new(),
            role: Role::Staff,
            full_name: "Ghost".into(),
            is_active: true,
            created_at: OffsetDateTime::now_utc(),
            last_login: None,
        };
        let token = keys.sign(&ghost).unwrap();
        assert!(!verify_token(&store, &keys, &token).await.valid);
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let store = MemoryUserStore::default();
        let keys = keys();
        let reg = register(&store, register_req("a@b.com", "longenough1", "Jane Doe"))
            .await
            .unwrap();
        let user = store.find_by_id(reg.user_id).await.unwrap().unwrap();

        let issued = OffsetDateTime::now_utc() - TimeDuration::days(7) - TimeDuration::hours(1);
        let token = keys.sign_at(&user, issued).unwrap();
        assert!(!verify_token(&store, &keys, &token).await.valid);
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let store = MemoryUserStore::default();
        assert!(!verify_token(&store, &keys(), "garbage").await.valid);
        assert!(!verify_token(&store, &keys(), "").await.valid);
    }

    #[tokio::test]
    async fn change_password_with_wrong_current_keeps_hash() {
        let store = MemoryUserStore::default();
        let reg = register(&store, register_req("a@b.com", "abcdefgh", "Jane Doe"))
            .await
            .unwrap();
        let before = store.find_by_id(reg.user_id).await.unwrap().unwrap().password_hash;

        let err = change_password(
            &store,
            ChangePasswordRequest {
                user_id: reg.user_id,
                current_password: "wrong1234".into(),
                new_password: "newpassword1".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));

        let after = store.find_by_id(reg.user_id).await.unwrap().unwrap().password_hash;
        assert_eq!(before, after);
        login(&store, &keys(), login_req("a@b.com", "abcdefgh"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn change_password_rotates_credentials() {
        let store = MemoryUserStore::default();
        let keys = keys();
        let reg = register(&store, register_req("a@b.com", "abcdefgh", "Jane Doe"))
            .await
            .unwrap();
        let old_token = login(&store, &keys, login_req("a@b.com", "abcdefgh"))
            .await
            .unwrap()
            .token;

        let res = change_password(
            &store,
            ChangePasswordRequest {
                user_id: reg.user_id,
                current_password: "abcdefgh".into(),
                new_password: "newpassword1".into(),
            },
        )
        .await
        .unwrap();
        assert!(res.success);

        let err = login(&store, &keys, login_req("a@b.com", "abcdefgh"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));
        login(&store, &keys, login_req("a@b.com", "newpassword1"))
            .await
            .unwrap();

        // tokens are stateless, earlier ones run until expiry
        assert!(verify_token(&store, &keys, &old_token).await.valid);
    }

    #[tokio::test]
    async fn change_password_error_kinds() {
        let store = MemoryUserStore::default();
        let err = change_password(
            &store,
            ChangePasswordRequest {
                user_id: 1,
                current_password: "whatever1".into(),
                new_password: "short".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let err = change_password(
            &store,
            ChangePasswordRequest {
                user_id: 404,
                current_password: "whatever1".into(),
                new_password: "newpassword1".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn profile_requires_active_user() {
        let store = MemoryUserStore::default();
        let reg = register(&store, register_req("a@b.com", "longenough1", "Jane Doe"))
            .await
            .unwrap();

        let user = profile(&store, reg.user_id).await.unwrap();
        assert_eq!(user.email, "a@b.com");

        store.set_active(reg.user_id, false).await.unwrap();
        let err = profile(&store, reg.user_id).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));
    }
}
