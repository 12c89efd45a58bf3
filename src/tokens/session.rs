use chrono::Duration;

use crate::config::TokenConfig;
use crate::error::CoreError;
use crate::storage::models::{Token, TokenScope};
use crate::storage::Database;

use super::authority::{self, IssuedToken};
use super::generator::hash_token;

/// An access/refresh pair handed to the cookie boundary
#[derive(Debug, Clone)]
pub struct SessionPair {
    pub access: IssuedToken,
    pub owner_id: String,
    pub refresh: IssuedToken,
}

/// Start a session for an owner already authenticated upstream
pub fn sign_in(db: &Database, owner_id: &str, config: &TokenConfig) -> Result<SessionPair, CoreError> {
    if owner_id.trim().is_empty() {
        return Err(CoreError::Invalid("owner_id is required".to_string()));
    }

    let access = authority::issue(
        db,
        owner_id,
        TokenScope::Access,
        ttl(config.access_ttl_seconds),
    )?;
    let refresh = authority::issue(
        db,
        owner_id,
        TokenScope::Refresh,
        ttl(config.refresh_ttl_seconds),
    )?;

    tracing::debug!(owner_id = %owner_id, "Started session");
    Ok(SessionPair {
        access,
        owner_id: owner_id.to_string(),
        refresh,
    })
}

/// Exchange a refresh token for a new pair. The presented token is rotated,
/// so presenting it again later revokes the owner's sessions.
pub fn refresh(
    db: &Database,
    refresh_plaintext: &str,
    config: &TokenConfig,
) -> Result<SessionPair, CoreError> {
    let hash = hash_token(refresh_plaintext);
    let token = authority::validate(db, &hash, TokenScope::Refresh)?;
    authority::rotate(db, &hash)?;
    sign_in(db, &token.owner_id, config)
}

/// Resolve an access token to its session
pub fn authenticate(db: &Database, access_plaintext: &str) -> Result<Token, CoreError> {
    authority::validate(db, &hash_token(access_plaintext), TokenScope::Access)
}

/// Revoke the presented tokens. Unknown tokens are ignored.
pub fn sign_out(
    db: &Database,
    access_plaintext: Option<&str>,
    refresh_plaintext: Option<&str>,
) -> Result<usize, CoreError> {
    let mut revoked = 0;
    for plaintext in [access_plaintext, refresh_plaintext].into_iter().flatten() {
        if authority::revoke_one(db, &hash_token(plaintext))? {
            revoked += 1;
        }
    }
    Ok(revoked)
}

/// Revoke every session of an owner
pub fn sign_out_everywhere(db: &Database, owner_id: &str) -> Result<usize, CoreError> {
    authority::revoke_all(db, owner_id)
}

/// Ten years; keeps `now + ttl` far away from chrono's range limits.
const MAX_TTL_SECONDS: i64 = 10 * 365 * 86400;

fn ttl(seconds: u64) -> Duration {
    Duration::seconds(i64::try_from(seconds).unwrap_or(MAX_TTL_SECONDS).min(MAX_TTL_SECONDS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::setup_db;

    #[test]
    fn test_sign_in_and_authenticate() {
        let (db, _temp) = setup_db();
        let config = TokenConfig::default();

        let pair = sign_in(&db, "user-1", &config).unwrap();
        assert_ne!(pair.access.plaintext, pair.refresh.plaintext);
        assert!(pair.refresh.expires_at > pair.access.expires_at);

        let token = authenticate(&db, &pair.access.plaintext).unwrap();
        assert_eq!(token.owner_id, "user-1");

        // A refresh token is not an access token
        assert!(authenticate(&db, &pair.refresh.plaintext).is_err());
    }

    #[test]
    fn test_sign_in_requires_owner() {
        let (db, _temp) = setup_db();
        assert!(matches!(
            sign_in(&db, "  ", &TokenConfig::default()),
            Err(CoreError::Invalid(_))
        ));
    }

    #[test]
    fn test_refresh_rotates_and_detects_replay() {
        let (db, _temp) = setup_db();
        let config = TokenConfig::default();

        let first = sign_in(&db, "user-1", &config).unwrap();
        let second = refresh(&db, &first.refresh.plaintext, &config).unwrap();
        assert_eq!(second.owner_id, "user-1");
        assert!(authenticate(&db, &second.access.plaintext).is_ok());

        // Replaying the rotated token kills every session of the owner
        assert!(matches!(
            refresh(&db, &first.refresh.plaintext, &config),
            Err(CoreError::Unauthorized)
        ));
        assert!(authenticate(&db, &second.access.plaintext).is_err());
        assert!(refresh(&db, &second.refresh.plaintext, &config).is_err());
    }

    #[test]
    fn test_sign_out_revokes_presented_tokens() {
        let (db, _temp) = setup_db();
        let config = TokenConfig::default();
        let pair = sign_in(&db, "user-1", &config).unwrap();
        let other = sign_in(&db, "user-1", &config).unwrap();

        let revoked = sign_out(
            &db,
            Some(pair.access.plaintext.as_str()),
            Some(pair.refresh.plaintext.as_str()),
        )
        .unwrap();
        assert_eq!(revoked, 2);
        assert!(authenticate(&db, &pair.access.plaintext).is_err());
        assert!(authenticate(&db, &other.access.plaintext).is_ok());

        assert_eq!(sign_out_everywhere(&db, "user-1").unwrap(), 2);
        assert!(authenticate(&db, &other.access.plaintext).is_err());
    }
}
