use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use kidgate_shared::auth::Role;
use kidgate_shared::jwt::{self, JwtClaims};

use super::{AppError, AppState};

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: JwtClaims,
}

/// Verify the bearer token on every private route. Tokens are minted by the
/// external account service with the shared secret; verification here is
/// stateless (signature + expiry).
pub async fn require_bearer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized());
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return unauthorized(),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let prefix = "Bearer ";
    if !header_str.starts_with(prefix) {
        return unauthorized();
    }
    let token = &header_str[prefix.len()..];

    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error=%e, "auth: jwt decode failed");
            return unauthorized();
        }
    };

    if let Err(e) = validate_claims(&claims) {
        tracing::warn!(error=?e, parent=%claims.sub, "auth: validate_claims failed");
        return unauthorized();
    }

    req.extensions_mut().insert(AuthCtx { claims });
    Ok(next.run(req).await)
}

fn validate_claims(claims: &JwtClaims) -> Result<(), AppError> {
    if claims.sub.trim().is_empty() {
        return Err(AppError::forbidden());
    }
    match claims.role {
        Role::Parent => {
            // Parent tokens act on any of the parent's devices; a pinned
            // device id would be a confused issuance.
            if claims.device_id.is_some() {
                return Err(AppError::forbidden());
            }
        }
        Role::Device => {
            let device_id = claims.device_id.as_deref().unwrap_or("");
            if device_id.trim().is_empty() {
                return Err(AppError::forbidden());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: Role, device_id: Option<&str>) -> JwtClaims {
        JwtClaims {
            sub: "parent1".into(),
            jti: "jti".into(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
            role,
            device_id: device_id.map(|s| s.to_string()),
        }
    }

    #[test]
    fn parent_token_must_not_pin_a_device() {
        assert!(validate_claims(&claims(Role::Parent, None)).is_ok());
        assert!(validate_claims(&claims(Role::Parent, Some("tablet-7"))).is_err());
    }

    #[test]
    fn device_token_requires_device_id() {
        assert!(validate_claims(&claims(Role::Device, Some("tablet-7"))).is_ok());
        assert!(validate_claims(&claims(Role::Device, None)).is_err());
        assert!(validate_claims(&claims(Role::Device, Some("  "))).is_err());
    }
}
