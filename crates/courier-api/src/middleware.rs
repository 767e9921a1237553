use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use courier_types::api::Claims;

use crate::state::AppState;

/// Extract and validate the JWT, then stash its claims in request extensions.
///
/// The token comes from `Authorization: Bearer ...`, or from a `token` query
/// parameter for WebSocket upgrades, where browsers cannot set headers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(&req)
        .or_else(|| query_token(&req))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = decode_claims(&token, &state.jwt_secret).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn decode_claims(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn query_token(req: &Request) -> Option<String> {
    req.uri()
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use uuid::Uuid;

    #[test]
    fn token_from_header_or_query() {
        let req = Request::builder()
            .uri("/conversations")
            .header(header::AUTHORIZATION, "Bearer abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc"));

        let req = Request::builder()
            .uri("/conversations/x/live?foo=1&token=xyz")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), None);
        assert_eq!(query_token(&req).as_deref(), Some("xyz"));
    }

    #[test]
    fn claims_require_matching_secret() {
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "ada".into(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"right")).unwrap();

        assert_eq!(decode_claims(&token, "right").map(|c| c.sub), Some(claims.sub));
        assert!(decode_claims(&token, "wrong").is_none());
    }
}
