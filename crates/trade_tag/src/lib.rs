use core_types::Side;
use thiserror::Error;

/// Parsed position tag binding a broker position to a side, a session hash
/// and a grid index. Wire form: `{side}_{hash}_idx{n}` where side is `buy` or
/// `sell`, hash is 8 lowercase hex characters and n is a decimal index with
/// no leading zeros.
///
/// Comments that do not match the grammar belong to *foreign* positions: not
/// managed by this engine, invisible to identity checks and aggregates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeTag {
    pub side: Side,
    pub hash: String,
    pub index: u32,
}

impl TradeTag {
    /// Reconstructs the session id this tag belongs to (`{side}_{hash}`),
    /// the value carried in `CLOSE_ALL` comments.
    pub fn session_id(&self) -> String {
        format!("{}_{}", self.side, self.hash)
    }
}

pub const HASH_LEN: usize = 8;

const IDX_MARKER: &str = "_idx";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("unknown side prefix")]
    UnknownSide,
    #[error("session hash must be {HASH_LEN} lowercase hex characters")]
    BadHash,
    #[error("missing index marker")]
    MissingIndex,
    #[error("index must be a decimal integer without leading zeros")]
    BadIndex,
}

/// Builds the wire comment for one grid order. Pure; the inverse of [`parse`]
/// for any valid `hash`.
pub fn encode(side: Side, hash: &str, index: u32) -> String {
    format!("{side}_{hash}{IDX_MARKER}{index}")
}

/// Parses a position comment against the tag grammar
/// `^(buy|sell)_[0-9a-f]{{8}}_idx(0|[1-9][0-9]*)$`.
pub fn parse(comment: &str) -> Result<TradeTag, TagError> {
    let (side, rest) = if let Some(rest) = comment.strip_prefix("buy_") {
        (Side::Buy, rest)
    } else if let Some(rest) = comment.strip_prefix("sell_") {
        (Side::Sell, rest)
    } else {
        return Err(TagError::UnknownSide);
    };

    let (hash, idx) = rest.split_once(IDX_MARKER).ok_or(TagError::MissingIndex)?;
    if hash.len() != HASH_LEN || !hash.bytes().all(is_lower_hex) {
        return Err(TagError::BadHash);
    }
    if idx.is_empty()
        || !idx.bytes().all(|b| b.is_ascii_digit())
        || (idx.len() > 1 && idx.starts_with('0'))
    {
        return Err(TagError::BadIndex);
    }
    let index = idx.parse::<u32>().map_err(|_| TagError::BadIndex)?;

    Ok(TradeTag {
        side,
        hash: hash.to_string(),
        index,
    })
}

fn is_lower_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}
