//! Per-term session cookies.
//!
//! Compass keys its search state to a session established by posting the term
//! code. Reads made without that cookie do not fail; they silently return
//! incomplete pages. Every term therefore owns one [`TermSession`], shared
//! read-only by its department tasks and renewed under an exclusive lock.

use crate::compass::CompassError;
use cookie::Cookie;
use std::future::Future;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(custom_debug_derive::Debug)]
struct SessionState {
    generation: u64,
    #[debug(with = "crate::fmt::redacted")]
    cookie: String,
}

/// A cookie snapshot tagged with the generation it belongs to.
#[derive(Clone, custom_debug_derive::Debug)]
pub struct SessionCookie {
    pub generation: u64,
    #[debug(with = "crate::fmt::redacted")]
    pub header: String,
}

#[derive(Debug)]
pub struct TermSession {
    term_code: String,
    state: RwLock<SessionState>,
}

impl TermSession {
    pub fn new(term_code: impl Into<String>, cookie: String) -> Self {
        Self {
            term_code: term_code.into(),
            state: RwLock::new(SessionState {
                generation: 0,
                cookie,
            }),
        }
    }

    pub fn term_code(&self) -> &str {
        &self.term_code
    }

    /// Current cookie header. Waits while a renewal is in progress.
    pub async fn cookie(&self) -> SessionCookie {
        let state = self.state.read().await;
        SessionCookie {
            generation: state.generation,
            header: state.cookie.clone(),
        }
    }

    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Replace the cookie if it is still the one the caller saw expire.
    ///
    /// `handshake` runs while the write lock is held, so concurrent callers
    /// that observed the same `observed` generation produce exactly one new
    /// handshake; the others see the bumped generation and return.
    pub async fn renew_with<F, Fut>(&self, observed: u64, handshake: F) -> Result<u64, CompassError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, CompassError>>,
    {
        let mut state = self.state.write().await;
        if state.generation != observed {
            debug!(
                term = self.term_code.as_str(),
                observed,
                current = state.generation,
                "Session already renewed by another task"
            );
            return Ok(state.generation);
        }

        let cookie = handshake().await?;
        state.cookie = cookie;
        state.generation += 1;
        info!(
            term = self.term_code.as_str(),
            generation = state.generation,
            "Session renewed"
        );
        Ok(state.generation)
    }
}

/// Collapse `Set-Cookie` header values into a single `Cookie` request header.
///
/// Attributes (`Path`, `HttpOnly`, ...) are discarded; unparsable values are
/// skipped. Returns `None` when no cookie was set.
pub fn cookie_header<'a>(set_cookies: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let pairs: Vec<String> = set_cookies
        .into_iter()
        .filter_map(|raw| Cookie::parse(raw).ok())
        .map(|c| format!("{}={}", c.name(), c.value()))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
