//! Match bootstrap parameters
//!
//! The embedding page hands the match its identity as a query string,
//! `?matchId=<id>&playerId=<id>&opponentId=<id>`. Keys and values are
//! percent-decoded. `matchId` and `playerId` are mandatory.

use crate::error::{MatchError, CODE_MISSING_PARAMETERS};
use log::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchParams {
    pub match_id: String,
    pub player_id: String,
    pub opponent_id: String,
}

impl MatchParams {
    /// Parses a query string or a full URL carrying one.
    ///
    /// Pairs that do not split into exactly one key and one value are skipped.
    /// Unknown keys are ignored.
    pub fn from_query(input: &str) -> Result<Self, MatchError> {
        let query = match input.split_once('?') {
            Some((_, query)) => query,
            None => input,
        };
        let query = query.split('#').next().unwrap_or_default();

        let mut match_id = None;
        let mut player_id = None;
        let mut opponent_id = None;

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let mut parts = pair.split('=');
            let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                debug!("Skipping malformed bootstrap pair {:?}", pair);
                continue;
            };

            let value = percent_decode(value);
            match percent_decode(key).as_str() {
                "matchId" => match_id = Some(value),
                "playerId" => player_id = Some(value),
                "opponentId" => opponent_id = Some(value),
                _ => {}
            }
        }

        let match_id = match_id.filter(|v| !v.is_empty());
        let player_id = player_id.filter(|v| !v.is_empty());

        match (match_id, player_id) {
            (Some(match_id), Some(player_id)) => {
                let params = Self {
                    match_id,
                    player_id,
                    opponent_id: opponent_id.unwrap_or_default(),
                };
                info!(
                    "Bootstrap: matchId={}, playerId={}, opponentId={}",
                    params.match_id, params.player_id, params.opponent_id
                );
                Ok(params)
            }
            _ => Err(MatchError::setup(
                "Missing URL parameters",
                CODE_MISSING_PARAMETERS,
            )),
        }
    }
}

/// Decodes `%XX` escapes. Invalid escapes are kept verbatim, `+` is not a space.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
