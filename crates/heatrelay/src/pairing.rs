//! Pair links and durable pairs.
//!
//! A caregiver is issued a [`PairLink`]: a numeric short code that can be read
//! out or printed, and a random token that travels with the link. The first
//! redemption presenting both creates a [`Pair`]. After that the short code
//! alone finds the pair again, while the link itself refuses to be redeemed a
//! second time.
//!
//! ```text
//! PairLink:  active ──redeem──▶ redeemed
//!               └──ttl passes──▶ expired      (marked on lookup)
//! Pair:      active ──deactivate──▶ inactive
//! ```

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::config::PairingConfig;
use crate::error::{Error, Result};
use crate::secret::{generate_elder_code, generate_short_code, generate_token, SecretHasher};
use crate::storage::{links, pairs};

/// Elder codes tried before giving up.
const MAX_ELDER_CODE_ATTEMPTS: u32 = 20;

/// Lifecycle of a pair link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Issued and not yet used.
    Active,
    /// Exchanged for a pair.
    Redeemed,
    /// Time-to-live passed before redemption.
    Expired,
}

impl LinkStatus {
    /// Stored name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Redeemed => "redeemed",
            Self::Expired => "expired",
        }
    }

    /// Decode a stored name. Unknown values are treated as expired.
    #[must_use]
    pub fn from_db(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "redeemed" => Self::Redeemed,
            _ => Self::Expired,
        }
    }
}

/// Lifecycle of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    /// In use.
    Active,
    /// Retired; invisible to lookups.
    Inactive,
}

impl PairStatus {
    /// Stored name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    /// Decode a stored name. Unknown values are treated as inactive.
    #[must_use]
    pub fn from_db(raw: &str) -> Self {
        if raw == "active" {
            Self::Active
        } else {
            Self::Inactive
        }
    }
}

/// One-time issuance record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairLink {
    /// Row id.
    pub id: i64,
    /// Digest of the short code.
    pub short_code_hash: String,
    /// Digest of the companion token.
    pub token_hash: String,
    /// Community the link was issued for.
    pub community_code: String,
    /// Lifecycle state.
    pub status: LinkStatus,
    /// When the link stops being redeemable.
    pub expires_at: DateTime<Utc>,
    /// When the link was redeemed.
    pub redeemed_at: Option<DateTime<Utc>>,
    /// Pair created by redemption.
    pub pair_id: Option<i64>,
    /// Issue time.
    pub created_at: DateTime<Utc>,
}

impl PairLink {
    /// Whether the time-to-live has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Durable elder and caregiver relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pair {
    /// Row id.
    pub id: i64,
    /// Digest of the short code that created the pair.
    #[serde(skip_serializing)]
    pub short_code_hash: String,
    /// Globally unique public identifier.
    pub elder_code: String,
    /// Community the pair belongs to.
    pub community_code: String,
    /// Lifecycle state.
    pub status: PairStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last time the pair was looked up.
    pub last_active_at: Option<DateTime<Utc>>,
}

impl Pair {
    /// Whether the pair is in use.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == PairStatus::Active
    }
}

/// Secrets for a freshly issued link.
///
/// This is the only place the plaintext short code and token exist; they are
/// not stored and cannot be recovered later.
#[derive(Clone, Serialize)]
pub struct IssuedLink {
    /// Row id of the link.
    pub link_id: i64,
    /// Numeric short code.
    pub short_code: String,
    /// Companion token.
    pub token: String,
    /// Community the link is for.
    pub community_code: String,
    /// Redeem before this instant.
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedLink")
            .field("link_id", &self.link_id)
            .field("short_code", &"<redacted>")
            .field("token", &"<redacted>")
            .field("community_code", &self.community_code)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// How a lookup found its pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Redemption {
    /// The code belongs to an existing active pair.
    Returning {
        /// The pair.
        pair: Pair,
    },
    /// A link was redeemed just now.
    Redeemed {
        /// The pair bound to the link.
        pair: Pair,
        /// The link that was redeemed.
        link_id: i64,
        /// Whether the pair row was created by this redemption.
        created: bool,
    },
}

impl Redemption {
    /// The pair, however it was reached.
    #[must_use]
    pub const fn pair(&self) -> &Pair {
        match self {
            Self::Returning { pair } | Self::Redeemed { pair, .. } => pair,
        }
    }

    /// Take the pair.
    #[must_use]
    pub fn into_pair(self) -> Pair {
        match self {
            Self::Returning { pair } | Self::Redeemed { pair, .. } => pair,
        }
    }
}

/// Strip spaces and dashes; the code must then be all digits.
///
/// # Errors
///
/// Returns [`Error::InvalidShortCode`] if anything but digits remain, or the
/// length is not `digits`.
pub fn normalize_short_code(raw: &str, digits: u32) -> Result<String> {
    let code: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if code.len() != digits as usize || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidShortCode);
    }
    Ok(code)
}

/// Trim a community code and check it is a plain name.
///
/// Letters, digits, spaces, `_`, `.` and `-` are allowed, starting with a
/// letter or digit, up to 100 characters.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the code is blank or has other characters.
pub fn validate_community_code(raw: &str) -> Result<&str> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^[\p{L}\p{N}][\p{L}\p{N} _.\-]{0,99}$").expect("Invalid regex pattern")
    });

    let code = raw.trim();
    if code.is_empty() {
        return Err(Error::invalid_input("community code must not be empty"));
    }
    if !pattern.is_match(code) {
        return Err(Error::invalid_input(format!("invalid community code: {code:?}")));
    }
    Ok(code)
}

/// Draw short codes until one is unused by any link or pair.
///
/// Returns the plaintext code and its digest.
///
/// # Errors
///
/// Returns [`Error::CodeSpaceExhausted`] after `max_attempts` collisions, or an
/// error if the database operation fails.
pub fn unique_short_code(
    conn: &Connection,
    hasher: &SecretHasher,
    digits: u32,
    max_attempts: u32,
) -> Result<(String, String)> {
    for _ in 0..max_attempts {
        let code = generate_short_code(digits);
        let hash = hasher.hash(&code);
        if !pairs::code_hash_exists(conn, &hash)? && !links::code_hash_exists(conn, &hash)? {
            return Ok((code, hash));
        }
        debug!("short code collision, drawing again");
    }
    Err(Error::CodeSpaceExhausted {
        kind: "short code",
        attempts: max_attempts,
    })
}

fn unique_elder_code(conn: &Connection) -> Result<String> {
    for _ in 0..MAX_ELDER_CODE_ATTEMPTS {
        let code = generate_elder_code();
        if !pairs::elder_code_exists(conn, &code)? {
            return Ok(code);
        }
    }
    Err(Error::CodeSpaceExhausted {
        kind: "elder code",
        attempts: MAX_ELDER_CODE_ATTEMPTS,
    })
}

/// Issue a link for `community_code`.
///
/// # Errors
///
/// Returns an error if the community is blank, no unique code could be drawn,
/// or the database operation fails.
pub fn issue_link(
    conn: &Connection,
    hasher: &SecretHasher,
    config: &PairingConfig,
    community_code: &str,
    now: DateTime<Utc>,
) -> Result<IssuedLink> {
    let community_code = validate_community_code(community_code)?;

    let (short_code, short_code_hash) = unique_short_code(
        conn,
        hasher,
        config.short_code_digits,
        config.max_code_attempts,
    )?;
    let token = generate_token();
    let expires_at = now + chrono::Duration::days(i64::from(config.link_ttl_days));

    let link_id = links::insert(
        conn,
        &short_code_hash,
        &hasher.hash(&token),
        community_code,
        expires_at,
        now,
    )?;

    Ok(IssuedLink {
        link_id,
        short_code,
        token,
        community_code: community_code.to_string(),
        expires_at,
    })
}

/// Resolve a short code, redeeming its link when a token is presented.
///
/// Without a token only an existing active pair can be found. With a token
/// the link is checked first: it must be unexpired, unredeemed and match the
/// token. An expired link is marked as such as a side effect.
///
/// # Errors
///
/// Returns one of the redemption errors ([`Error::InvalidShortCode`],
/// [`Error::LinkExpired`], [`Error::TokenMissing`], [`Error::TokenMismatch`],
/// [`Error::AlreadyRedeemed`]), or an error if the database operation fails.
pub fn redeem(
    conn: &Connection,
    hasher: &SecretHasher,
    config: &PairingConfig,
    short_code: &str,
    token: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Redemption> {
    let code = normalize_short_code(short_code, config.short_code_digits)?;
    let code_hash = hasher.hash(&code);
    let token = token.map(str::trim).filter(|t| !t.is_empty());

    let Some(token) = token else {
        if let Some(pair) = pairs::find_active_by_code_hash(conn, &code_hash)? {
            return Ok(Redemption::Returning { pair });
        }
        return match links::find_by_code_hash(conn, &code_hash)? {
            Some(link) if link.status == LinkStatus::Active => Err(Error::TokenMissing),
            _ => Err(Error::InvalidShortCode),
        };
    };

    let link = links::find_by_code_hash(conn, &code_hash)?.ok_or(Error::InvalidShortCode)?;

    match link.status {
        LinkStatus::Redeemed => return Err(Error::AlreadyRedeemed),
        LinkStatus::Expired => return Err(Error::LinkExpired),
        LinkStatus::Active => {}
    }
    if link.is_expired_at(now) {
        links::mark_expired(conn, link.id)?;
        return Err(Error::LinkExpired);
    }
    if !hasher.verify(token, &link.token_hash) {
        return Err(Error::TokenMismatch);
    }

    let (pair, created) = match link.pair_id {
        Some(pair_id) => (pairs::get(conn, pair_id)?.ok_or(Error::PairNotFound(pair_id))?, false),
        None => {
            let elder_code = unique_elder_code(conn)?;
            let pair = pairs::insert(conn, &link.short_code_hash, &elder_code, &link.community_code, now)?;
            (pair, true)
        }
    };

    if !links::mark_redeemed(conn, link.id, pair.id, now)? {
        return Err(Error::AlreadyRedeemed);
    }
    pairs::touch_last_active(conn, pair.id, now)?;

    Ok(Redemption::Redeemed {
        pair,
        link_id: link.id,
        created,
    })
}

/// Where a lookup would land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTarget {
    /// Pair the code already resolves to, if any.
    pub pair_id: Option<i64>,
    /// Community of the link or pair.
    pub community_code: String,
}

/// Resolve the community a lookup would touch, without writing anything.
///
/// Returns `None` whenever the lookup is bound to fail. [`redeem`] still
/// makes the decision inside the write transaction; this only lets the
/// caller fetch weather before taking the lock.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn peek(
    conn: &Connection,
    hasher: &SecretHasher,
    config: &PairingConfig,
    short_code: &str,
    token: Option<&str>,
) -> Result<Option<LookupTarget>> {
    let Ok(code) = normalize_short_code(short_code, config.short_code_digits) else {
        return Ok(None);
    };
    let code_hash = hasher.hash(&code);

    if token.map(str::trim).is_some_and(|t| !t.is_empty()) {
        return Ok(links::find_by_code_hash(conn, &code_hash)?
            .filter(|link| link.status == LinkStatus::Active)
            .map(|link| LookupTarget {
                pair_id: link.pair_id,
                community_code: link.community_code,
            }));
    }
    Ok(pairs::find_active_by_code_hash(conn, &code_hash)?.map(|pair| LookupTarget {
        pair_id: Some(pair.id),
        community_code: pair.community_code,
    }))
}

/// Load a pair that must exist and be active.
///
/// # Errors
///
/// Returns [`Error::PairNotFound`] or [`Error::PairInactive`], or an error if
/// the database operation fails.
pub fn require_active(conn: &Connection, pair_id: i64) -> Result<Pair> {
    let pair = pairs::get(conn, pair_id)?.ok_or(Error::PairNotFound(pair_id))?;
    if !pair.is_active() {
        return Err(Error::PairInactive(pair_id));
    }
    Ok(pair)
}

/// Retire a pair. Deactivating an inactive pair is a no-op.
///
/// Returns the pair as it is afterwards and whether anything changed.
///
/// # Errors
///
/// Returns [`Error::PairNotFound`], or an error if the database operation
/// fails.
pub fn deactivate(conn: &Connection, pair_id: i64) -> Result<(Pair, bool)> {
    let mut pair = pairs::get(conn, pair_id)?.ok_or(Error::PairNotFound(pair_id))?;
    let changed = pairs::set_status(conn, pair_id, PairStatus::Inactive)?;
    pair.status = PairStatus::Inactive;
    Ok((pair, changed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use chrono::{Duration, TimeZone};

    fn hasher() -> SecretHasher {
        SecretHasher::new("test-pepper")
    }

    fn config() -> PairingConfig {
        PairingConfig::default()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_normalize_short_code() {
        assert_eq!(normalize_short_code(" 1234-5678 ", 8).unwrap(), "12345678");
        assert!(matches!(
            normalize_short_code("1234567", 8),
            Err(Error::InvalidShortCode)
        ));
        assert!(matches!(
            normalize_short_code("1234567a", 8),
            Err(Error::InvalidShortCode)
        ));
    }

    #[test]
    fn test_issue_link_stores_only_digests() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();

        let issued = issue_link(conn, &hasher(), &config(), " harbor ", now()).unwrap();
        assert_eq!(issued.short_code.len(), 8);
        assert_eq!(issued.community_code, "harbor");
        assert_eq!(issued.expires_at, now() + Duration::days(3));

        let link = links::get(conn, issued.link_id).unwrap().unwrap();
        assert_ne!(link.short_code_hash, issued.short_code);
        assert_ne!(link.token_hash, issued.token);
        assert_eq!(link.short_code_hash, hasher().hash(&issued.short_code));
        assert_eq!(link.status, LinkStatus::Active);
    }

    #[test]
    fn test_issue_link_rejects_blank_community() {
        let storage = Storage::open_in_memory().unwrap();
        let result = issue_link(storage.connection(), &hasher(), &config(), "  ", now());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_validate_community_code() {
        assert_eq!(validate_community_code("  north-7 ").unwrap(), "north-7");
        assert_eq!(validate_community_code("东湖社区").unwrap(), "东湖社区");
        assert!(validate_community_code("<script>").is_err());
        assert!(validate_community_code("-leading").is_err());
        assert!(validate_community_code(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_issued_link_debug_redacts() {
        let storage = Storage::open_in_memory().unwrap();
        let issued = issue_link(storage.connection(), &hasher(), &config(), "harbor", now()).unwrap();
        let debug_str = format!("{issued:?}");
        assert!(!debug_str.contains(&issued.short_code));
        assert!(!debug_str.contains(&issued.token));
    }

    #[test]
    fn test_redeem_creates_pair_once() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let issued = issue_link(conn, &hasher(), &config(), "harbor", now()).unwrap();

        let first = redeem(conn, &hasher(), &config(), &issued.short_code, Some(&issued.token), now())
            .unwrap();
        let Redemption::Redeemed { pair, created, .. } = &first else {
            panic!("expected a redemption, got {first:?}");
        };
        assert!(created);
        assert_eq!(pair.community_code, "harbor");

        let second = redeem(conn, &hasher(), &config(), &issued.short_code, Some(&issued.token), now());
        assert!(matches!(second, Err(Error::AlreadyRedeemed)));
        assert_eq!(pairs::list_active(conn).unwrap().len(), 1);
    }

    #[test]
    fn test_peek_resolves_without_writing() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let issued = issue_link(conn, &hasher(), &config(), "harbor", now()).unwrap();

        let before = peek(conn, &hasher(), &config(), &issued.short_code, Some(&issued.token))
            .unwrap()
            .unwrap();
        assert_eq!(before.pair_id, None);
        assert_eq!(before.community_code, "harbor");
        assert_eq!(peek(conn, &hasher(), &config(), &issued.short_code, None).unwrap(), None);
        assert_eq!(peek(conn, &hasher(), &config(), "12", Some("t")).unwrap(), None);
        assert_eq!(links::get(conn, issued.link_id).unwrap().unwrap().status, LinkStatus::Active);

        let redeemed = redeem(conn, &hasher(), &config(), &issued.short_code, Some(&issued.token), now())
            .unwrap();
        let returning = peek(conn, &hasher(), &config(), &issued.short_code, None)
            .unwrap()
            .unwrap();
        assert_eq!(returning.pair_id, Some(redeemed.pair().id));
        assert_eq!(
            peek(conn, &hasher(), &config(), &issued.short_code, Some(&issued.token)).unwrap(),
            None
        );
    }

    #[test]
    fn test_returning_visit_without_token() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let issued = issue_link(conn, &hasher(), &config(), "harbor", now()).unwrap();

        let before = redeem(conn, &hasher(), &config(), &issued.short_code, None, now());
        assert!(matches!(before, Err(Error::TokenMissing)));

        let redeemed = redeem(conn, &hasher(), &config(), &issued.short_code, Some(&issued.token), now())
            .unwrap();
        let again = redeem(conn, &hasher(), &config(), &issued.short_code, None, now()).unwrap();
        assert!(matches!(again, Redemption::Returning { .. }));
        assert_eq!(again.pair().id, redeemed.pair().id);
    }

    #[test]
    fn test_wrong_token() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let issued = issue_link(conn, &hasher(), &config(), "harbor", now()).unwrap();

        let result = redeem(conn, &hasher(), &config(), &issued.short_code, Some("nope"), now());
        assert!(matches!(result, Err(Error::TokenMismatch)));
        assert!(pairs::list_active(conn).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_code() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        for token in [None, Some("token")] {
            let result = redeem(conn, &hasher(), &config(), "00000000", token, now());
            assert!(matches!(result, Err(Error::InvalidShortCode)));
        }
    }

    #[test]
    fn test_expired_link_is_marked() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let issued = issue_link(conn, &hasher(), &config(), "harbor", now()).unwrap();
        let late = issued.expires_at + Duration::seconds(1);

        let result = redeem(conn, &hasher(), &config(), &issued.short_code, Some(&issued.token), late);
        assert!(matches!(result, Err(Error::LinkExpired)));
        let link = links::get(conn, issued.link_id).unwrap().unwrap();
        assert_eq!(link.status, LinkStatus::Expired);

        let again = redeem(conn, &hasher(), &config(), &issued.short_code, Some(&issued.token), late);
        assert!(matches!(again, Err(Error::LinkExpired)));
    }

    #[test]
    fn test_short_codes_unique_across_links_and_pairs() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let mut config = config();
        config.short_code_digits = 6;

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let issued = issue_link(conn, &hasher(), &config, "harbor", now()).unwrap();
            assert!(seen.insert(hasher().hash(&issued.short_code)));
        }
    }

    #[test]
    fn test_code_space_exhausted() {
        let storage = Storage::open_in_memory().unwrap();
        let result = unique_short_code(storage.connection(), &hasher(), 6, 0);
        assert!(matches!(
            result,
            Err(Error::CodeSpaceExhausted { kind: "short code", .. })
        ));
    }

    #[test]
    fn test_deactivate_hides_pair() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let issued = issue_link(conn, &hasher(), &config(), "harbor", now()).unwrap();
        let pair = redeem(conn, &hasher(), &config(), &issued.short_code, Some(&issued.token), now())
            .unwrap()
            .into_pair();

        let (after, changed) = deactivate(conn, pair.id).unwrap();
        assert!(changed);
        assert_eq!(after.status, PairStatus::Inactive);
        assert!(!deactivate(conn, pair.id).unwrap().1);

        assert!(matches!(require_active(conn, pair.id), Err(Error::PairInactive(_))));
        let lookup = redeem(conn, &hasher(), &config(), &issued.short_code, None, now());
        assert!(matches!(lookup, Err(Error::InvalidShortCode)));
        assert!(matches!(deactivate(conn, 9999), Err(Error::PairNotFound(9999))));
    }
}
