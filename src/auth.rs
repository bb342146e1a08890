//! Capability gate for privileged booking operations.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::model::{HOUR_MS, Ms, TenantScope};
use crate::tenant::{TenantError, canonical_tenant_id};

const ADMIN_TYPE: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Business owner; acts on one tenant scope.
    Owner,
    /// Acts on every tenant.
    SuperAdmin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminClaims {
    pub jti: String,
    #[serde(rename = "idNegocio", default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub role: Role,
    #[serde(rename = "typ")]
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
}

/// A verified privileged caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSession {
    pub tenant_id: Option<String>,
    pub role: Role,
}

impl AdminSession {
    /// Owners are bound to their own tenant; an owner without a tenant
    /// administers the global (legacy) scope.
    pub fn can_act_on(&self, scope: &TenantScope) -> bool {
        match self.role {
            Role::SuperAdmin => true,
            Role::Owner => scope.matches(self.tenant_id.as_deref()),
        }
    }

    /// Scope to use when a request names none.
    pub fn scope(&self) -> TenantScope {
        TenantScope::from_option(self.tenant_id.as_deref())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredential,
    #[error("invalid credentials: {0}")]
    InvalidCredential(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
}

#[derive(Clone)]
pub struct AdminAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    session_ttl_ms: Ms,
}

impl AdminAuth {
    pub fn new(secret: &[u8], session_ttl_hours: u32) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            session_ttl_ms: session_ttl_hours as Ms * HOUR_MS,
        }
    }

    pub fn issue_session(
        &self,
        tenant_id: Option<&str>,
        role: Role,
        now: Ms,
    ) -> Result<String, AuthError> {
        let claims = AdminClaims {
            jti: ulid::Ulid::new().to_string(),
            tenant_id: tenant_id.map(str::to_string),
            role,
            token_type: ADMIN_TYPE.to_string(),
            iat: now / 1000,
            exp: (now + self.session_ttl_ms) / 1000,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidCredential(e.to_string()))
    }

    /// Verify an `Authorization` header value.
    pub fn verify(&self, header: Option<&str>) -> Result<AdminSession, AuthError> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingCredential)?;
        let data = jsonwebtoken::decode::<AdminClaims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| AuthError::InvalidCredential(e.to_string()))?;
        if data.claims.token_type != ADMIN_TYPE {
            return Err(AuthError::InvalidCredential("not an admin session".into()));
        }
        Ok(AdminSession {
            tenant_id: data.claims.tenant_id,
            role: data.claims.role,
        })
    }
}

// ── Operator sessions ────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SessionArgsError {
    #[error("unknown argument: {0}")]
    Unknown(String),
    #[error("--tenant needs a value")]
    MissingTenant,
    #[error("--tenant and --super-admin cannot be combined")]
    Conflict,
    #[error(transparent)]
    Tenant(#[from] TenantError),
}

/// Session asked for on the command line (`turnero token ...`).
///
/// `--tenant <idNegocio>` issues an owner session for that tenant,
/// `--super-admin` a super-admin one, and no flag the owner of the global
/// scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub tenant_id: Option<String>,
    pub role: Role,
}

impl SessionRequest {
    pub fn parse<I>(args: I) -> Result<Self, SessionArgsError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut tenant_id = None;
        let mut super_admin = false;
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--tenant" => {
                    let raw = args.next().ok_or(SessionArgsError::MissingTenant)?;
                    tenant_id = Some(canonical_tenant_id(&raw)?);
                }
                "--super-admin" => super_admin = true,
                _ => return Err(SessionArgsError::Unknown(arg)),
            }
        }
        match (tenant_id, super_admin) {
            (Some(_), true) => Err(SessionArgsError::Conflict),
            (None, true) => Ok(Self {
                tenant_id: None,
                role: Role::SuperAdmin,
            }),
            (tenant_id, false) => Ok(Self {
                tenant_id,
                role: Role::Owner,
            }),
        }
    }
}

impl AdminAuth {
    pub fn issue_for(&self, request: &SessionRequest, now: Ms) -> Result<String, AuthError> {
        self.issue_session(request.tenant_id.as_deref(), request.role, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::now_ms;
    use crate::token::TokenIssuer;

    const SECRET: &[u8] = b"test-secret-key-for-testing";

    fn auth() -> AdminAuth {
        AdminAuth::new(SECRET, 8)
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {token}")
    }

    #[test]
    fn owner_session_round_trip() {
        let auth = auth();
        let token = auth.issue_session(Some("salon-x"), Role::Owner, now_ms()).unwrap();
        let session = auth.verify(Some(&bearer(&token))).unwrap();
        assert_eq!(session.tenant_id.as_deref(), Some("salon-x"));
        assert_eq!(session.role, Role::Owner);
        assert_eq!(session.scope(), TenantScope::Tenant("salon-x".into()));
    }

    #[test]
    fn missing_vs_invalid() {
        let auth = auth();
        assert!(matches!(auth.verify(None), Err(AuthError::MissingCredential)));
        assert!(matches!(auth.verify(Some("Basic abc")), Err(AuthError::MissingCredential)));
        assert!(matches!(auth.verify(Some("Bearer ")), Err(AuthError::MissingCredential)));
        assert!(matches!(
            auth.verify(Some("Bearer garbage")),
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[test]
    fn expired_session_rejected() {
        let auth = auth();
        let token = auth
            .issue_session(None, Role::SuperAdmin, now_ms() - 9 * HOUR_MS)
            .unwrap();
        assert!(matches!(
            auth.verify(Some(&bearer(&token))),
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[test]
    fn confirmation_token_is_not_a_session() {
        let confirmation = TokenIssuer::new(SECRET, 4)
            .issue_confirmation(None, "a@b.co", 1, "corte", now_ms())
            .unwrap();
        assert!(matches!(
            auth().verify(Some(&bearer(&confirmation))),
            Err(AuthError::InvalidCredential(_))
        ));
    }

    #[test]
    fn scope_rules() {
        let salon = TenantScope::Tenant("salon-x".into());
        let other = TenantScope::Tenant("otro".into());
        let owner = AdminSession {
            tenant_id: Some("salon-x".into()),
            role: Role::Owner,
        };
        assert!(owner.can_act_on(&salon));
        assert!(!owner.can_act_on(&other));
        assert!(!owner.can_act_on(&TenantScope::Global));

        let legacy = AdminSession {
            tenant_id: None,
            role: Role::Owner,
        };
        assert!(legacy.can_act_on(&TenantScope::Global));
        assert!(!legacy.can_act_on(&salon));

        let root = AdminSession {
            tenant_id: None,
            role: Role::SuperAdmin,
        };
        assert!(root.can_act_on(&other));
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn operator_sessions_verify() {
        let auth = auth();

        let owner = SessionRequest::parse(args(&["--tenant", " Salon-X "])).unwrap();
        let token = auth.issue_for(&owner, now_ms()).unwrap();
        let session = auth.verify(Some(&bearer(&token))).unwrap();
        assert_eq!(session.role, Role::Owner);
        assert_eq!(session.scope(), TenantScope::Tenant("salon-x".into()));

        let root = SessionRequest::parse(args(&["--super-admin"])).unwrap();
        let token = auth.issue_for(&root, now_ms()).unwrap();
        let session = auth.verify(Some(&bearer(&token))).unwrap();
        assert_eq!(session.role, Role::SuperAdmin);
        assert!(session.can_act_on(&TenantScope::Tenant("otro".into())));

        let legacy = SessionRequest::parse(args(&[])).unwrap();
        assert_eq!(legacy.tenant_id, None);
        assert_eq!(legacy.role, Role::Owner);
    }

    #[test]
    fn operator_session_args_rejected() {
        assert!(matches!(
            SessionRequest::parse(args(&["--tenant"])),
            Err(SessionArgsError::MissingTenant)
        ));
        assert!(matches!(
            SessionRequest::parse(args(&["--tenant", "salon-x", "--super-admin"])),
            Err(SessionArgsError::Conflict)
        ));
        assert!(matches!(
            SessionRequest::parse(args(&["--tenant", "salon.x"])),
            Err(SessionArgsError::Tenant(_))
        ));
        assert!(matches!(
            SessionRequest::parse(args(&["--role", "owner"])),
            Err(SessionArgsError::Unknown(_))
        ));
    }
}
