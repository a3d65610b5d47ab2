use super::{AppError, auth::AuthCtx};
use axum::response::Response;
use axum::{
    extract::OriginalUri,
    http::{Method, Request},
    middleware::Next,
};
use kidgate_shared::auth::Role;
use kidgate_shared::jwt::JwtClaims;
use percent_encoding::percent_decode_str;

/// Route-level role gate. Parents pass for every device route; ownership is
/// then enforced by the `(parent, identifier)` lookup in storage, so a
/// parent can still only reach their own devices. Device tokens are pinned
/// to their polling surface and their own device id.
pub async fn enforce_acl(
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    let Some(auth) = req.extensions().get::<AuthCtx>() else {
        return Err(AppError::unauthorized());
    };
    let claims = &auth.claims;

    let segs = segmented(&path);
    let api_prefix = ["api", "v1"];
    if !segs.as_slice().starts_with(&api_prefix) {
        tracing::warn!(?segs, "ACL: path outside API scope");
        return Err(AppError::forbidden());
    }
    let rest = &segs[api_prefix.len()..];

    let decision = match claims.role {
        Role::Parent => allow_parent(&method, rest),
        Role::Device => allow_device(&method, rest, claims),
    };

    if let Err(err) = decision {
        tracing::warn!(
            method = %method,
            path = %path,
            parent = %claims.sub,
            role = ?claims.role,
            token_device = ?claims.device_id,
            "ACL: no rule matched; denying"
        );
        return Err(err);
    }

    Ok(next.run(req).await)
}

fn allow_parent(method: &Method, rest: &[&str]) -> Result<(), AppError> {
    match rest {
        ["devices"] if *method == Method::POST => Ok(()),
        ["sync", "usage"] if *method == Method::POST => Ok(()),
        ["devices", _, "usage"] if *method == Method::GET => Ok(()),
        ["devices", _, "report"] if *method == Method::GET => Ok(()),
        ["devices", _, "rules"] if *method == Method::GET || *method == Method::POST => Ok(()),
        ["devices", _, "blocked-apps"] if *method == Method::GET || *method == Method::POST => {
            Ok(())
        }
        ["devices", _, "blocked-apps", "unblock"] if *method == Method::POST => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn allow_device(method: &Method, rest: &[&str], claims: &JwtClaims) -> Result<(), AppError> {
    match rest {
        // The sync body carries the device id; the handler pins it to the
        // token before resolving the device.
        ["sync", "usage"] if *method == Method::POST => Ok(()),
        ["devices", device, "rules"] if *method == Method::GET => ensure_device(claims, device),
        ["devices", device, "blocked-apps"] if *method == Method::GET => {
            ensure_device(claims, device)
        }
        _ => Err(AppError::forbidden()),
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn decode(seg: &str) -> String {
    percent_decode_str(seg).decode_utf8_lossy().to_string()
}

fn ensure_device(claims: &JwtClaims, seg: &str) -> Result<(), AppError> {
    let expected = claims.device_id.as_ref().ok_or_else(AppError::forbidden)?;
    let provided = decode(seg);
    if expected == &provided {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_claims(device_id: &str) -> JwtClaims {
        JwtClaims {
            sub: "parent1".into(),
            jti: "jti".into(),
            exp: 0,
            role: Role::Device,
            device_id: Some(device_id.to_string()),
        }
    }

    #[test]
    fn parent_rules_cover_every_route() {
        assert!(allow_parent(&Method::POST, &["devices"]).is_ok());
        assert!(allow_parent(&Method::POST, &["sync", "usage"]).is_ok());
        assert!(allow_parent(&Method::GET, &["devices", "t7", "usage"]).is_ok());
        assert!(allow_parent(&Method::GET, &["devices", "t7", "report"]).is_ok());
        assert!(allow_parent(&Method::POST, &["devices", "t7", "rules"]).is_ok());
        assert!(allow_parent(&Method::POST, &["devices", "t7", "blocked-apps", "unblock"]).is_ok());
        assert!(allow_parent(&Method::GET, &["devices"]).is_err());
    }

    #[test]
    fn device_tokens_only_reach_their_own_polling_surface() {
        let claims = device_claims("tablet-7");
        assert!(allow_device(&Method::POST, &["sync", "usage"], &claims).is_ok());
        assert!(allow_device(&Method::GET, &["devices", "tablet-7", "rules"], &claims).is_ok());
        assert!(
            allow_device(&Method::GET, &["devices", "tablet-7", "blocked-apps"], &claims).is_ok()
        );
        assert!(allow_device(&Method::GET, &["devices", "other", "rules"], &claims).is_err());
        assert!(
            allow_device(&Method::POST, &["devices", "tablet-7", "rules"], &claims).is_err()
        );
        assert!(allow_device(&Method::POST, &["devices"], &claims).is_err());
    }

    #[test]
    fn encoded_device_ids_decode_before_comparison() {
        let claims = device_claims("tablet 7");
        assert!(allow_device(&Method::GET, &["devices", "tablet%207", "rules"], &claims).is_ok());
    }
}
