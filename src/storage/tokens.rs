use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};

use super::db::{expiry_key, expiry_key_ms, index_push, index_remove, Database, DatabaseError};
use super::models::{Token, TokenScope, TokenUse};
use super::tables::*;

impl Database {
    // ========================================================================
    // Token operations
    // ========================================================================

    /// Store a token and its owner/expiry index entries
    pub fn put_token(&self, token: &Token) -> Result<(), DatabaseError> {
        debug_assert!(!token.hash.is_empty(), "token hash must not be empty");
        debug_assert!(!token.owner_id.is_empty(), "token owner must not be empty");

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(TOKENS)?;
            let data = rmp_serde::to_vec_named(token)?;
            table.insert(token.hash.as_str(), data.as_slice())?;
        }
        {
            let mut index_table = write_txn.open_table(OWNER_TOKENS)?;
            index_push(&mut index_table, &token.owner_id, &token.hash)?;
        }
        {
            let mut expiry_table = write_txn.open_table(TOKEN_EXPIRY)?;
            let ek = expiry_key(&token.expires_at, &token.hash);
            expiry_table.insert(ek.as_str(), token.hash.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a token by its hash
    pub fn get_token(&self, hash: &str) -> Result<Option<Token>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TOKENS)?;

        match table.get(hash)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Get every token belonging to an owner
    pub fn get_tokens_by_owner(&self, owner_id: &str) -> Result<Vec<Token>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index_table = read_txn.open_table(OWNER_TOKENS)?;
        let tokens_table = read_txn.open_table(TOKENS)?;

        let hashes: Vec<String> = match index_table.get(owner_id)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut tokens = Vec::new();
        for hash in hashes {
            if let Some(data) = tokens_table.get(hash.as_str())? {
                tokens.push(rmp_serde::from_slice(data.value())?);
            }
        }
        Ok(tokens)
    }

    /// Delete a single token
    pub fn delete_token(&self, hash: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = remove_token_in(&write_txn, hash)?.is_some();
        write_txn.commit()?;
        Ok(deleted)
    }

    /// Delete every token of an owner, returning how many were removed
    pub fn delete_tokens_by_owner(&self, owner_id: &str) -> Result<usize, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = remove_owner_tokens_in(&write_txn, owner_id)?;
        write_txn.commit()?;
        Ok(deleted)
    }

    /// Mark a refresh token used. A token that was already used is a replay:
    /// the owner's whole token set is deleted in the same transaction.
    pub fn consume_refresh_token(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenUse, DatabaseError> {
        let write_txn = self.begin_write()?;

        let token: Option<Token> = {
            let table = write_txn.open_table(TOKENS)?;
            let result = match table.get(hash)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            result
        };

        // Used is checked before expiry so an expired replay still cascades.
        let outcome = match token {
            None => TokenUse::Missing,
            Some(token) if token.scope != TokenScope::Refresh => TokenUse::Rejected,
            Some(token) if token.used => {
                let revoked = remove_owner_tokens_in(&write_txn, &token.owner_id)?;
                TokenUse::Replayed {
                    owner_id: token.owner_id,
                    revoked,
                }
            }
            Some(token) if token.is_expired_at(now) => TokenUse::Rejected,
            Some(mut token) => {
                token.used = true;
                let data = rmp_serde::to_vec_named(&token)?;
                let mut table = write_txn.open_table(TOKENS)?;
                table.insert(hash, data.as_slice())?;
                TokenUse::Rotated(token)
            }
        };

        write_txn.commit()?;
        Ok(outcome)
    }

    /// Delete tokens expired at `now` using the expiration index (no full table scan).
    pub fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let now_ms = now.timestamp_millis();

        // Phase 1: read the expiration index to collect expired hashes
        let expired: Vec<String> = {
            let read_txn = self.begin_read()?;
            let table = read_txn.open_table(TOKEN_EXPIRY)?;
            let mut result = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                match expiry_key_ms(key.value()) {
                    Some(ms) if ms <= now_ms => result.push(value.value().to_string()),
                    _ => break,
                }
            }
            result
        };

        if expired.is_empty() {
            return Ok(0);
        }

        // Phase 2: delete them and all index entries. Tokens removed in the
        // meantime by a cascade are skipped.
        let write_txn = self.begin_write()?;
        let mut deleted = 0;
        for hash in &expired {
            if remove_token_in(&write_txn, hash)?.is_some() {
                deleted += 1;
            }
        }
        write_txn.commit()?;
        Ok(deleted)
    }
}

/// Remove a token and its index entries inside an open write transaction.
fn remove_token_in(write_txn: &WriteTransaction, hash: &str) -> Result<Option<Token>, DatabaseError> {
    let token: Option<Token> = {
        let mut table = write_txn.open_table(TOKENS)?;
        let existing: Option<Token> = match table.get(hash)? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        if existing.is_some() {
            table.remove(hash)?;
        }
        existing
    };

    let Some(token) = token else {
        return Ok(None);
    };

    {
        let mut index_table = write_txn.open_table(OWNER_TOKENS)?;
        index_remove(&mut index_table, &token.owner_id, hash)?;
    }
    {
        let mut expiry_table = write_txn.open_table(TOKEN_EXPIRY)?;
        let ek = expiry_key(&token.expires_at, hash);
        expiry_table.remove(ek.as_str())?;
    }

    Ok(Some(token))
}

/// Remove every token of an owner inside an open write transaction.
fn remove_owner_tokens_in(write_txn: &WriteTransaction, owner_id: &str) -> Result<usize, DatabaseError> {
    let hashes: Vec<String> = {
        let index_table = write_txn.open_table(OWNER_TOKENS)?;
        let result = match index_table.get(owner_id)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => Vec::new(),
        };
        result
    };

    let mut removed = 0;
    for hash in &hashes {
        if remove_token_in(write_txn, hash)?.is_some() {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_token, setup_db};
    use chrono::Duration;

    #[test]
    fn test_put_and_get_token() {
        let (db, _temp) = setup_db();

        let token = make_token("h1", "user-1", TokenScope::Access);
        db.put_token(&token).unwrap();

        let fetched = db.get_token("h1").unwrap().unwrap();
        assert_eq!(fetched.owner_id, "user-1");
        assert_eq!(fetched.scope, TokenScope::Access);
        assert!(!fetched.used);
    }

    #[test]
    fn test_delete_tokens_by_owner_leaves_other_owners() {
        let (db, _temp) = setup_db();

        for (hash, owner) in [("h1", "user-1"), ("h2", "user-1"), ("h3", "user-2")] {
            db.put_token(&make_token(hash, owner, TokenScope::Refresh)).unwrap();
        }

        assert_eq!(db.delete_tokens_by_owner("user-1").unwrap(), 2);
        assert!(db.get_tokens_by_owner("user-1").unwrap().is_empty());
        assert_eq!(db.get_tokens_by_owner("user-2").unwrap().len(), 1);
    }

    #[test]
    fn test_consume_refresh_token_twice_cascades() {
        let (db, _temp) = setup_db();
        db.put_token(&make_token("r1", "user-1", TokenScope::Refresh)).unwrap();
        db.put_token(&make_token("a1", "user-1", TokenScope::Access)).unwrap();

        let now = Utc::now();
        assert!(matches!(
            db.consume_refresh_token("r1", now).unwrap(),
            TokenUse::Rotated(_)
        ));
        match db.consume_refresh_token("r1", now).unwrap() {
            TokenUse::Replayed { owner_id, revoked } => {
                assert_eq!(owner_id, "user-1");
                assert_eq!(revoked, 2);
            }
            other => panic!("expected replay, got {other:?}"),
        }
        assert!(db.get_token("a1").unwrap().is_none());
    }

    #[test]
    fn test_consume_rejects_access_tokens() {
        let (db, _temp) = setup_db();
        db.put_token(&make_token("a1", "user-1", TokenScope::Access)).unwrap();

        assert!(matches!(
            db.consume_refresh_token("a1", Utc::now()).unwrap(),
            TokenUse::Rejected
        ));
        assert!(matches!(
            db.consume_refresh_token("nope", Utc::now()).unwrap(),
            TokenUse::Missing
        ));
    }

    #[test]
    fn test_delete_expired_tokens_uses_index() {
        let (db, _temp) = setup_db();

        let mut expired = make_token("old", "user-1", TokenScope::Access);
        expired.expires_at = Utc::now() - Duration::minutes(1);
        db.put_token(&expired).unwrap();
        db.put_token(&make_token("fresh", "user-1", TokenScope::Access)).unwrap();

        assert_eq!(db.delete_expired_tokens(Utc::now()).unwrap(), 1);
        assert!(db.get_token("old").unwrap().is_none());
        assert!(db.get_token("fresh").unwrap().is_some());
        assert_eq!(db.get_tokens_by_owner("user-1").unwrap().len(), 1);
    }
}
