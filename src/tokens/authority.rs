//! Issues, validates, rotates and revokes opaque session tokens.
//!
//! Tokens are random 256-bit values handed to the caller once; the store only
//! ever sees their SHA-256. A refresh token may be rotated exactly once.
//! Presenting it again means it was copied, so every token of its owner is
//! revoked and the caller gets `Unauthorized`.

use chrono::{DateTime, Duration, Utc};

use crate::error::CoreError;
use crate::storage::models::{Token, TokenScope, TokenUse};
use crate::storage::Database;

use super::generator::{generate_token, hash_token};

/// A freshly issued token. `plaintext` is not recoverable after this point.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub expires_at: DateTime<Utc>,
    pub plaintext: String,
}

/// Issue a token for `owner_id`, persisting only its hash
pub fn issue(
    db: &Database,
    owner_id: &str,
    scope: TokenScope,
    ttl: Duration,
) -> Result<IssuedToken, CoreError> {
    let plaintext = generate_token();
    let now = Utc::now();
    let token = Token {
        created_at: now,
        expires_at: now + ttl,
        hash: hash_token(&plaintext),
        owner_id: owner_id.to_string(),
        scope,
        used: false,
    };

    db.put_token(&token)?;
    tracing::debug!(owner_id = %owner_id, ?scope, expires_at = %token.expires_at, "Issued token");

    Ok(IssuedToken {
        expires_at: token.expires_at,
        plaintext,
    })
}

/// Look up an active token of the given scope
pub fn validate(db: &Database, hash: &str, scope: TokenScope) -> Result<Token, CoreError> {
    let token = db.get_token(hash)?.ok_or(CoreError::Unauthorized)?;

    if token.used {
        revoke_replayed(db, &token.owner_id)?;
        return Err(CoreError::Unauthorized);
    }

    if token.scope != scope {
        tracing::debug!(owner_id = %token.owner_id, expected = ?scope, actual = ?token.scope, "Token scope mismatch");
        return Err(CoreError::Unauthorized);
    }

    if token.is_expired_at(Utc::now()) {
        // Expired - delete it (best-effort, the sweeper catches leftovers)
        if let Err(e) = db.delete_token(hash) {
            tracing::warn!(error = %e, owner_id = %token.owner_id, "Failed to delete expired token");
        }
        tracing::debug!(owner_id = %token.owner_id, "Token expired");
        return Err(CoreError::Unauthorized);
    }

    Ok(token)
}

/// Mark a refresh token used. A second rotation of the same token revokes
/// every token of its owner.
pub fn rotate(db: &Database, hash: &str) -> Result<(), CoreError> {
    match db.consume_refresh_token(hash, Utc::now())? {
        TokenUse::Rotated(token) => {
            tracing::debug!(owner_id = %token.owner_id, "Rotated refresh token");
            Ok(())
        }
        TokenUse::Replayed { owner_id, revoked } => {
            tracing::warn!(
                owner_id = %owner_id,
                revoked,
                "Refresh token reused; revoked all sessions of owner"
            );
            Err(CoreError::Unauthorized)
        }
        TokenUse::Rejected | TokenUse::Missing => Err(CoreError::Unauthorized),
    }
}

/// Revoke every token of an owner
pub fn revoke_all(db: &Database, owner_id: &str) -> Result<usize, CoreError> {
    let revoked = db.delete_tokens_by_owner(owner_id)?;
    tracing::debug!(owner_id = %owner_id, revoked, "Revoked all tokens");
    Ok(revoked)
}

/// Revoke a single token
pub fn revoke_one(db: &Database, hash: &str) -> Result<bool, CoreError> {
    let deleted = db.delete_token(hash)?;
    if deleted {
        tracing::debug!("Revoked token");
    }
    Ok(deleted)
}

/// Delete expired tokens (called by background task)
pub fn sweep_expired(db: &Database) -> Result<usize, CoreError> {
    let cleaned = db.delete_expired_tokens(Utc::now())?;
    if cleaned > 0 {
        tracing::info!(count = cleaned, "Cleaned up expired tokens");
    }
    Ok(cleaned)
}

fn revoke_replayed(db: &Database, owner_id: &str) -> Result<(), CoreError> {
    let revoked = db.delete_tokens_by_owner(owner_id)?;
    tracing::warn!(
        owner_id = %owner_id,
        revoked,
        "Rotated refresh token presented again; revoked all sessions of owner"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_token, setup_db};

    fn issue_hash(db: &Database, owner: &str, scope: TokenScope) -> String {
        let issued = issue(db, owner, scope, Duration::hours(1)).unwrap();
        hash_token(&issued.plaintext)
    }

    #[test]
    fn test_issue_stores_only_hash() {
        let (db, _temp) = setup_db();

        let issued = issue(&db, "user-1", TokenScope::Access, Duration::hours(1)).unwrap();
        assert!(db.get_token(&issued.plaintext).unwrap().is_none());

        let stored = db.get_token(&hash_token(&issued.plaintext)).unwrap().unwrap();
        assert_eq!(stored.owner_id, "user-1");
        assert_eq!(stored.expires_at, issued.expires_at);
    }

    #[test]
    fn test_validate_checks_scope() {
        let (db, _temp) = setup_db();
        let hash = issue_hash(&db, "user-1", TokenScope::Access);

        assert_eq!(validate(&db, &hash, TokenScope::Access).unwrap().owner_id, "user-1");
        assert!(matches!(
            validate(&db, &hash, TokenScope::Refresh),
            Err(CoreError::Unauthorized)
        ));
        assert!(matches!(
            validate(&db, "unknown", TokenScope::Access),
            Err(CoreError::Unauthorized)
        ));
    }

    #[test]
    fn test_validate_rejects_expired() {
        let (db, _temp) = setup_db();

        let mut token = make_token("h1", "user-1", TokenScope::Access);
        token.expires_at = Utc::now() - Duration::seconds(1);
        db.put_token(&token).unwrap();

        assert!(matches!(
            validate(&db, "h1", TokenScope::Access),
            Err(CoreError::Unauthorized)
        ));
        assert!(db.get_token("h1").unwrap().is_none());
    }

    #[test]
    fn test_rotate_twice_revokes_everything() {
        let (db, _temp) = setup_db();
        let access = issue_hash(&db, "user-1", TokenScope::Access);
        let refresh = issue_hash(&db, "user-1", TokenScope::Refresh);
        let other_owner = issue_hash(&db, "user-2", TokenScope::Access);

        rotate(&db, &refresh).unwrap();
        assert!(matches!(rotate(&db, &refresh), Err(CoreError::Unauthorized)));

        assert!(matches!(
            validate(&db, &access, TokenScope::Access),
            Err(CoreError::Unauthorized)
        ));
        assert!(db.get_tokens_by_owner("user-1").unwrap().is_empty());
        assert!(validate(&db, &other_owner, TokenScope::Access).is_ok());
    }

    #[test]
    fn test_validate_used_refresh_token_cascades() {
        let (db, _temp) = setup_db();
        let access = issue_hash(&db, "user-1", TokenScope::Access);
        let refresh = issue_hash(&db, "user-1", TokenScope::Refresh);

        rotate(&db, &refresh).unwrap();
        assert!(matches!(
            validate(&db, &refresh, TokenScope::Refresh),
            Err(CoreError::Unauthorized)
        ));
        assert!(validate(&db, &access, TokenScope::Access).is_err());
    }

    #[test]
    fn test_rotate_rejects_access_token() {
        let (db, _temp) = setup_db();
        let access = issue_hash(&db, "user-1", TokenScope::Access);

        assert!(matches!(rotate(&db, &access), Err(CoreError::Unauthorized)));
        // Not a replay: the token itself is still valid
        assert!(validate(&db, &access, TokenScope::Access).is_ok());
    }

    #[test]
    fn test_concurrent_rotation_admits_one() {
        let (db, _temp) = setup_db();
        let refresh = issue_hash(&db, "user-1", TokenScope::Refresh);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = db.clone();
                let hash = refresh.clone();
                std::thread::spawn(move || rotate(&db, &hash).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert!(db.get_tokens_by_owner("user-1").unwrap().is_empty());
    }

    #[test]
    fn test_revoke_one_and_all() {
        let (db, _temp) = setup_db();
        let a = issue_hash(&db, "user-1", TokenScope::Access);
        issue_hash(&db, "user-1", TokenScope::Refresh);

        assert!(revoke_one(&db, &a).unwrap());
        assert!(!revoke_one(&db, &a).unwrap());
        assert_eq!(revoke_all(&db, "user-1").unwrap(), 1);
    }

    #[test]
    fn test_sweep_keeps_live_tokens() {
        let (db, _temp) = setup_db();
        let live = issue_hash(&db, "user-1", TokenScope::Access);

        let mut stale = make_token("stale", "user-1", TokenScope::Refresh);
        stale.expires_at = Utc::now() - Duration::hours(1);
        db.put_token(&stale).unwrap();

        assert_eq!(sweep_expired(&db).unwrap(), 1);
        assert_eq!(sweep_expired(&db).unwrap(), 0);
        assert!(validate(&db, &live, TokenScope::Access).is_ok());
    }
}
