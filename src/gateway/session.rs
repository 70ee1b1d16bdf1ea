//! Signed session cookie.
//!
//! Value layout: `base64url(username).issued_at.hex(hmac)`, where the HMAC
//! covers everything before the last `.`. Nothing is stored server-side; a
//! session ends when the cookie is cleared or `issued_at + ttl` passes.

use super::AppState;
use crate::config::GatewayConfig;
use crate::util::epoch_secs;
use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::Redirect;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "connectiondb_session";

/// Identity carried by a valid cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub issued_at: u64,
}

/// Issues and checks session cookies under one HMAC key.
pub struct SessionSigner {
    mac: HmacSha256,
    ttl_secs: u64,
    secure: bool,
}

impl SessionSigner {
    pub fn new(key: &[u8], ttl_secs: u64, secure: bool) -> Result<Self, InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(key)?,
            ttl_secs,
            secure,
        })
    }

    /// Build from `[gateway]`. Without a configured secret a random key is
    /// generated, so sessions do not survive a restart.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, InvalidLength> {
        let key = match config.session_secret.as_deref() {
            Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
            _ => {
                tracing::warn!(
                    "No session secret configured; using an ephemeral key. \
                     Set SESSION_SECRET to keep users logged in across restarts."
                );
                let mut key = vec![0u8; 32];
                OsRng.fill_bytes(&mut key);
                key
            }
        };
        Self::new(&key, config.session_ttl_secs, config.secure_cookies)
    }

    /// `Set-Cookie` header value establishing a session for `username`.
    pub fn issue(&self, username: &str) -> String {
        self.issue_at(username, epoch_secs())
    }

    fn issue_at(&self, username: &str, issued_at: u64) -> String {
        let payload = format!("{}.{issued_at}", URL_SAFE_NO_PAD.encode(username));
        let signature = hex::encode(self.mac(&payload).finalize().into_bytes());
        self.cookie(&format!("{payload}.{signature}"), self.ttl_secs)
    }

    /// `Set-Cookie` header value that removes the session.
    pub fn clear(&self) -> String {
        self.cookie("", 0)
    }

    /// Check a raw cookie value. Bad signatures, malformed values and
    /// expired sessions all yield `None`.
    pub fn verify(&self, value: &str) -> Option<Session> {
        self.verify_at(value, epoch_secs())
    }

    fn verify_at(&self, value: &str, now: u64) -> Option<Session> {
        let (payload, signature_hex) = value.rsplit_once('.')?;
        let signature = hex::decode(signature_hex).ok()?;
        self.mac(payload).verify_slice(&signature).ok()?;

        let (user_b64, issued_at) = payload.split_once('.')?;
        let issued_at: u64 = issued_at.parse().ok()?;
        if issued_at > now || now - issued_at >= self.ttl_secs {
            return None;
        }
        let username = String::from_utf8(URL_SAFE_NO_PAD.decode(user_b64).ok()?).ok()?;
        if username.is_empty() {
            return None;
        }
        Some(Session {
            username,
            issued_at,
        })
    }

    /// Find and verify the session cookie among the request's `Cookie`
    /// headers.
    pub fn session_from_headers(&self, headers: &HeaderMap) -> Option<Session> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .filter(|(name, _)| *name == SESSION_COOKIE)
            .find_map(|(_, value)| self.verify(value))
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac
    }

    fn cookie(&self, value: &str, max_age: u64) -> String {
        let secure = if self.secure { "; Secure" } else { "" };
        format!("{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}{secure}")
    }
}

/// The logged-in username, if any.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Option<String>);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(
            state
                .sessions
                .session_from_headers(&parts.headers)
                .map(|s| s.username),
        ))
    }
}

/// The logged-in username. Anonymous requests are redirected to the login
/// page with the requested path in `next`.
#[derive(Debug, Clone)]
pub struct RequireUser(pub String);

impl FromRequestParts<AppState> for RequireUser {
    type Rejection = Redirect;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match state.sessions.session_from_headers(&parts.headers) {
            Some(session) => Ok(Self(session.username)),
            None => {
                let target = parts
                    .uri
                    .path_and_query()
                    .map_or("/", |pq| pq.as_str());
                Err(login_redirect(target))
            }
        }
    }
}

pub fn login_redirect(next: &str) -> Redirect {
    Redirect::to(&format!("/login?next={}", urlencoding::encode(next)))
}
