use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{dto::score::MatchScoreDto, state::score::Side};

/// Envelope pushed on `match/{id}` whenever a match score changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchUpdate {
    /// Whether the change also altered the tournament (bracket, standings).
    #[serde(default)]
    pub tournament_updated: bool,
    /// Winner reported by the publisher, if any.
    #[serde(default)]
    pub winner: Option<Side>,
    /// Score after the change.
    pub score: MatchScoreDto,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
/// Frames sent by realtime clients to the relay.
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },
    #[serde(rename = "publish")]
    Publish { topic: String, payload: Value },
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// Serialize the frame for the wire.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
/// Frames sent by the relay to realtime clients.
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "message")]
    Message { topic: String, payload: Value },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn client_frames_are_tagged_by_type() {
        let frame = ClientFrame::Subscribe {
            topic: "match/42".into(),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "subscribe", "topic": "match/42"})
        );
    }

    #[test]
    fn unknown_frame_types_are_tolerated() {
        let frame: ServerFrame = serde_json::from_str(r#"{"type": "presence"}"#).unwrap();
        assert_eq!(frame, ServerFrame::Unknown);
    }

    #[test]
    fn match_update_reads_the_envelope() {
        let update: MatchUpdate = serde_json::from_value(json!({
            "tournamentUpdated": true,
            "winner": null,
            "score": {"sets": [{"teamAScore": 6, "teamBScore": 4}]}
        }))
        .unwrap();
        assert!(update.tournament_updated);
        assert_eq!(update.winner, None);
        assert_eq!(update.score.sets[0].team_a_score, 6);
    }
}
