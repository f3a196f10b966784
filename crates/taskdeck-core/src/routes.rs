use crate::session::{SessionManager, SessionPhase, SessionSnapshot};
use crate::transport::LOGIN_PATH;

pub const DASHBOARD_PATH: &str = "/dashboard";
pub const RESET_PASSWORD_PREFIX: &str = "/reset-password";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Root,
    /// Only meaningful to anonymous visitors.
    Public,
    /// Reachable in either state.
    Recovery,
    Private,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Session restoration has not settled; show a loading state.
    Pending,
    Render,
    Redirect(String),
    NotFound,
}

pub fn classify(path: &str) -> RouteKind {
    let path = strip_query(path);
    match path {
        "/" | "" => RouteKind::Root,
        "/login" | "/register" | "/forgot-password" => RouteKind::Public,
        "/dashboard" => RouteKind::Private,
        _ if path == RESET_PASSWORD_PREFIX
            || path.starts_with(&format!("{RESET_PASSWORD_PREFIX}/")) =>
        {
            RouteKind::Recovery
        }
        _ => RouteKind::Unknown,
    }
}

/// Routing decisions against a live session.
pub struct RouteGuard;

impl RouteGuard {
    pub fn decide(path: &str, session: &SessionManager) -> RouteDecision {
        decide(path, &session.snapshot())
    }
}

/// Maps a requested path and the current session to what the client should
/// do. Nothing is decided while the session is still restoring.
pub fn decide(path: &str, session: &SessionSnapshot) -> RouteDecision {
    let kind = classify(path);
    if kind == RouteKind::Unknown {
        return RouteDecision::NotFound;
    }

    let authenticated = match session.phase() {
        SessionPhase::Restoring => return RouteDecision::Pending,
        SessionPhase::Authenticated => true,
        SessionPhase::Anonymous => false,
    };

    match (kind, authenticated) {
        (RouteKind::Root, true) => RouteDecision::Redirect(DASHBOARD_PATH.to_string()),
        (RouteKind::Root, false) => RouteDecision::Redirect(LOGIN_PATH.to_string()),
        (RouteKind::Public, true) => RouteDecision::Redirect(DASHBOARD_PATH.to_string()),
        (RouteKind::Private, false) => RouteDecision::Redirect(LOGIN_PATH.to_string()),
        _ => RouteDecision::Render,
    }
}

/// Token segment of a `/reset-password/<token>` path.
pub fn reset_token(path: &str) -> Option<&str> {
    strip_query(path)
        .strip_prefix(RESET_PASSWORD_PREFIX)?
        .strip_prefix('/')
        .filter(|token| !token.is_empty() && !token.contains('/'))
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}
