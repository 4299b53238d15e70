//! Session lookup from bearer tokens or the `token` cookie.

use std::collections::HashMap;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use ryoshu::config::AuthConfig;
use ryoshu::Viewer;

use crate::error::ApiError;
use crate::state::AppState;

const TOKEN_COOKIE: &str = "token";

/// Maps configured session tokens to viewers.
#[derive(Debug, Default)]
pub struct Authenticator {
    sessions: HashMap<String, Viewer>,
}

impl Authenticator {
    pub fn from_config(config: &AuthConfig) -> Self {
        let sessions = config
            .sessions
            .iter()
            .map(|s| {
                (
                    s.token.clone(),
                    Viewer::new(s.uploader_name.clone(), s.is_admin),
                )
            })
            .collect();
        Self { sessions }
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Viewer, ApiError> {
        let token = bearer_token(headers)
            .or_else(|| cookie_token(headers))
            .ok_or(ApiError::Unauthorized)?;
        self.sessions
            .get(token)
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

fn cookie_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value)
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Session(pub Viewer);

#[async_trait]
impl FromRequestParts<AppState> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state.authenticator().authenticate(&parts.headers).map(Session)
    }
}
