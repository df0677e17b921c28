use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{
    score::{GamePoint, MatchFormat, MatchScore, SUPER_TIE_BREAK_POINTS, SetScore, Side, TieBreakPoints},
    state_machine::{ScoreStateMachine, ValidationError},
};

/// One set as typed into a score editor.
///
/// Each field is either absent (not yet played), a non-negative integer or a
/// numeric string. Anything else is rejected when the set is parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSetInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_a_score: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_b_score: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_break_team_a: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_break_team_b: Option<Value>,
}

impl RawSetInput {
    /// A set with both game counts filled in.
    pub fn games(team_a: u32, team_b: u32) -> Self {
        Self {
            team_a_score: Some(team_a.into()),
            team_b_score: Some(team_b.into()),
            ..Self::default()
        }
    }

    /// A set carrying only tie-break points (super tie-break entry).
    pub fn tie_break_only(team_a: u32, team_b: u32) -> Self {
        Self::default().with_tie_break(team_a, team_b)
    }

    /// Attach tie-break points to the set.
    pub fn with_tie_break(mut self, team_a: u32, team_b: u32) -> Self {
        self.tie_break_team_a = Some(team_a.into());
        self.tie_break_team_b = Some(team_b.into());
        self
    }
}

impl From<&SetScoreDto> for RawSetInput {
    fn from(set: &SetScoreDto) -> Self {
        Self {
            team_a_score: Some(set.team_a_score.into()),
            team_b_score: Some(set.team_b_score.into()),
            tie_break_team_a: set.tie_break_team_a.map(Value::from),
            tie_break_team_b: set.tie_break_team_b.map(Value::from),
        }
    }
}

/// Wire representation of a set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetScoreDto {
    #[serde(default)]
    pub team_a_score: u32,
    #[serde(default)]
    pub team_b_score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_break_team_a: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_break_team_b: Option<u32>,
}

impl From<&SetScore> for SetScoreDto {
    fn from(set: &SetScore) -> Self {
        match set {
            SetScore::Regular {
                games_a,
                games_b,
                tie_break,
            } => Self {
                team_a_score: *games_a,
                team_b_score: *games_b,
                tie_break_team_a: tie_break.map(|points| points.team_a),
                tie_break_team_b: tie_break.map(|points| points.team_b),
            },
            // The set counts as 1-0 for its winner once decided.
            SetScore::SuperTieBreak(points) => {
                let (team_a_score, team_b_score) = match points.winner(SUPER_TIE_BREAK_POINTS) {
                    Some(Side::TeamA) => (1, 0),
                    Some(Side::TeamB) => (0, 1),
                    None => (0, 0),
                };
                Self {
                    team_a_score,
                    team_b_score,
                    tie_break_team_a: Some(points.team_a),
                    tie_break_team_b: Some(points.team_b),
                }
            }
        }
    }
}

/// Wire representation of a match score, as exchanged with the persistence
/// collaborator and carried by realtime pushes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchScoreDto {
    #[serde(default)]
    pub sets: Vec<SetScoreDto>,
    #[serde(default)]
    pub current_game_point_a: GamePoint,
    #[serde(default)]
    pub current_game_point_b: GamePoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_break_point_a: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_break_point_b: Option<u32>,
    #[serde(default)]
    pub forfeit: bool,
    #[serde(default)]
    pub forfeited_by: Option<Side>,
}

impl MatchScoreDto {
    /// Validate the payload against `format` and build the canonical domain score.
    pub fn into_score(self, format: &MatchFormat) -> Result<MatchScore, ValidationError> {
        let raw_sets = self.sets.iter().map(RawSetInput::from).collect::<Vec<_>>();
        let sets = ScoreStateMachine::parse_sets(&raw_sets, format)?;

        let forfeited_by = if self.forfeit {
            Some(self.forfeited_by.ok_or(ValidationError::ForfeitWithoutSide)?)
        } else {
            None
        };

        let tie_break_point = match (self.tie_break_point_a, self.tie_break_point_b) {
            (None, None) => None,
            (a, b) => Some(TieBreakPoints::new(a.unwrap_or(0), b.unwrap_or(0))),
        };

        Ok(MatchScore {
            sets,
            current_game_point_a: self.current_game_point_a,
            current_game_point_b: self.current_game_point_b,
            tie_break_point,
            forfeited_by,
        })
    }
}

impl From<&MatchScore> for MatchScoreDto {
    fn from(score: &MatchScore) -> Self {
        Self {
            sets: score.sets.iter().map(SetScoreDto::from).collect(),
            current_game_point_a: score.current_game_point_a,
            current_game_point_b: score.current_game_point_b,
            tie_break_point_a: score.tie_break_point.map(|points| points.team_a),
            tie_break_point_b: score.tie_break_point.map(|points| points.team_b),
            forfeit: score.forfeit(),
            forfeited_by: score.forfeited_by,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_input_accepts_missing_and_null_fields() {
        let raw: RawSetInput =
            serde_json::from_str(r#"{"teamAScore": 6, "teamBScore": null}"#).unwrap();
        assert_eq!(raw.team_a_score, Some(Value::from(6)));
        assert_eq!(raw.team_b_score, None);
        assert_eq!(raw.tie_break_team_a, None);
    }

    #[test]
    fn super_tie_break_set_is_written_as_one_set_to_nil() {
        let dto = SetScoreDto::from(&SetScore::SuperTieBreak(TieBreakPoints::new(8, 10)));
        assert_eq!(dto.team_a_score, 0);
        assert_eq!(dto.team_b_score, 1);
        assert_eq!(dto.tie_break_team_a, Some(8));
        assert_eq!(dto.tie_break_team_b, Some(10));
    }

    #[test]
    fn wire_payload_uses_camel_case() {
        let score = MatchScore {
            sets: vec![SetScore::games(6, 4)],
            current_game_point_a: GamePoint::Trente,
            forfeited_by: Some(Side::TeamB),
            ..MatchScore::empty()
        };
        let json = serde_json::to_value(MatchScoreDto::from(&score)).unwrap();
        assert_eq!(json["sets"][0]["teamAScore"], 6);
        assert_eq!(json["currentGamePointA"], "TRENTE");
        assert_eq!(json["forfeit"], true);
        assert_eq!(json["forfeitedBy"], "TEAM_B");
        assert!(json.get("tieBreakPointA").is_none());
    }

    #[test]
    fn forfeit_without_side_is_rejected() {
        let dto = MatchScoreDto {
            forfeit: true,
            ..MatchScoreDto::default()
        };
        assert_eq!(
            dto.into_score(&MatchFormat::padel_standard()),
            Err(ValidationError::ForfeitWithoutSide)
        );
    }

    #[test]
    fn negative_wire_values_fail_to_parse() {
        let result = serde_json::from_str::<SetScoreDto>(r#"{"teamAScore": -1, "teamBScore": 2}"#);
        assert!(result.is_err());
    }
}
