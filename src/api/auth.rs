//! Session cookies and the extractor that resolves them.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;

use super::response::ApiError;
use crate::tokens::{session, IssuedToken, SessionPair};
use crate::AppState;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Non-empty value of the cookie called `name`
pub fn read_cookie(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

fn session_cookie(name: &'static str, value: String, max_age: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .max_age(cookie::time::Duration::seconds(max_age))
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .build()
}

fn token_cookie(name: &'static str, token: &IssuedToken, secure: bool) -> Cookie<'static> {
    let max_age = (token.expires_at - Utc::now()).num_seconds().max(0);
    session_cookie(name, token.plaintext.clone(), max_age, secure)
}

/// Add both cookies of a fresh token pair
pub fn with_session(jar: CookieJar, pair: &SessionPair, secure: bool) -> CookieJar {
    jar.add(token_cookie(ACCESS_COOKIE, &pair.access, secure))
        .add(token_cookie(REFRESH_COOKIE, &pair.refresh, secure))
}

/// Expire both session cookies
pub fn without_session(jar: CookieJar, secure: bool) -> CookieJar {
    jar.add(session_cookie(ACCESS_COOKIE, String::new(), 0, secure))
        .add(session_cookie(REFRESH_COOKIE, String::new(), 0, secure))
}

/// The owner behind a valid `accessToken` cookie
#[derive(Debug, Clone)]
pub struct SessionOwner(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for SessionOwner {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let access = read_cookie(&jar, ACCESS_COOKIE).ok_or_else(ApiError::unauthorized)?;
        let token = session::authenticate(&state.db, &access)?;
        Ok(SessionOwner(token.owner_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::{COOKIE, SET_COOKIE};
    use axum::http::{HeaderMap, HeaderValue};
    use axum::response::IntoResponse;
    use chrono::Duration;

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; accessToken=abc123; refreshToken="),
        );
        headers.append(COOKIE, HeaderValue::from_static("other=1"));
        let jar = CookieJar::from_headers(&headers);

        assert_eq!(read_cookie(&jar, ACCESS_COOKIE).as_deref(), Some("abc123"));
        assert_eq!(read_cookie(&jar, "other").as_deref(), Some("1"));
        assert_eq!(read_cookie(&jar, REFRESH_COOKIE), None);
        assert_eq!(read_cookie(&jar, "missing"), None);
    }

    #[test]
    fn test_cookie_attributes() {
        let secure = session_cookie(ACCESS_COOKIE, "abc".to_string(), 60, true);
        assert_eq!(secure.value(), "abc");
        assert_eq!(secure.http_only(), Some(true));
        assert_eq!(secure.same_site(), Some(SameSite::Strict));
        assert_eq!(secure.secure(), Some(true));
        assert_eq!(secure.path(), Some("/"));
        assert_eq!(secure.max_age(), Some(cookie::time::Duration::seconds(60)));

        let plain = session_cookie(ACCESS_COOKIE, "abc".to_string(), 60, false);
        assert_ne!(plain.secure(), Some(true));
        assert!(!plain.to_string().contains("Secure"));
    }

    #[test]
    fn test_session_jar_sets_both_cookies() {
        let now = Utc::now();
        let pair = SessionPair {
            access: IssuedToken {
                expires_at: now + Duration::minutes(15),
                plaintext: "acc".to_string(),
            },
            owner_id: "user-1".to_string(),
            refresh: IssuedToken {
                expires_at: now + Duration::days(30),
                plaintext: "ref".to_string(),
            },
        };

        let response = with_session(CookieJar::new(), &pair, true).into_response();
        let cookies: Vec<Cookie<'static>> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| Cookie::parse(v.to_string()).ok())
            .collect();

        assert_eq!(cookies.len(), 2);
        let access = cookies.iter().find(|c| c.name() == ACCESS_COOKIE).unwrap();
        assert_eq!(access.value(), "acc");
        assert!(access.max_age().unwrap() <= cookie::time::Duration::minutes(15));
        let refresh = cookies.iter().find(|c| c.name() == REFRESH_COOKIE).unwrap();
        assert_eq!(refresh.value(), "ref");

        let cleared = without_session(CookieJar::new(), false);
        assert!(cleared.iter().all(|c| c.value().is_empty()));
        assert!(cleared
            .iter()
            .all(|c| c.max_age() == Some(cookie::time::Duration::ZERO)));
    }
}
