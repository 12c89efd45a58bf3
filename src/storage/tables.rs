use redb::TableDefinition;

/// Session tokens: token_hash -> Token (msgpack)
pub const TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("tokens");

/// Secondary index: owner_id -> Vec<token_hash> (msgpack)
pub const OWNER_TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("owner_tokens");

/// Expiration index: "{expires_at_ms:020}:{token_hash}" -> token_hash
pub const TOKEN_EXPIRY: TableDefinition<&str, &str> = TableDefinition::new("token_expiry");

/// Schools: school_id -> School (msgpack)
pub const SCHOOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("schools");

/// Locations: location_id -> Location (msgpack)
pub const LOCATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("locations");

/// Unique index: normalized_name -> location_id
pub const LOCATION_NAMES: TableDefinition<&str, &str> = TableDefinition::new("location_names");

/// Check-ins ordered per location: "{location_id}/{created_at_ms:020}/{id}" -> CheckIn (msgpack)
pub const CHECK_INS: TableDefinition<&str, &[u8]> = TableDefinition::new("check_ins");

/// Check-in id index: check_in_id -> check-in key
pub const CHECK_IN_IDS: TableDefinition<&str, &str> = TableDefinition::new("check_in_ids");
