use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    dto::score::MatchScoreDto,
    state::score::{MatchId, Side},
};

/// Payload handed to the persistence collaborator when a score is saved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveScoreRequest {
    pub match_id: MatchId,
    pub score: MatchScoreDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub court: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "time::serde::rfc3339::option::serialize"
    )]
    pub scheduled_time: Option<OffsetDateTime>,
}

/// Confirmed result of a save.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedScore {
    pub score: MatchScoreDto,
    #[serde(default)]
    pub winner: Option<Side>,
    #[serde(default)]
    pub tournament_updated: bool,
}
