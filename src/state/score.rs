//! Domain model for a two-team match: sides, game points, sets and the match format.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::dto::validation::{validate_games_per_set, validate_sets_to_win, validate_tie_break_at};

/// Points needed to take a super tie-break (win by two).
pub const SUPER_TIE_BREAK_POINTS: u32 = 10;

/// Identifier of a match as known by the tournament collaborator.
pub type MatchId = String;

/// Realtime topic carrying score pushes for `match_id`.
pub fn match_topic(match_id: &str) -> String {
    format!("match/{match_id}")
}

/// One of the two teams of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    /// First listed team.
    TeamA,
    /// Second listed team.
    TeamB,
}

impl Side {
    /// The other team.
    pub fn opponent(self) -> Side {
        match self {
            Side::TeamA => Side::TeamB,
            Side::TeamB => Side::TeamA,
        }
    }
}

/// Score inside the game currently being played.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePoint {
    /// 0
    #[default]
    Zero,
    /// 15
    Quinze,
    /// 30
    Trente,
    /// 40
    Quarante,
    /// Advantage after deuce.
    Avantage,
}

/// Point count of a tie-break, regular or super.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TieBreakPoints {
    /// Points won by team A.
    pub team_a: u32,
    /// Points won by team B.
    pub team_b: u32,
}

impl TieBreakPoints {
    /// Build a tie-break score.
    pub fn new(team_a: u32, team_b: u32) -> Self {
        Self { team_a, team_b }
    }

    /// Winner once one side reached `target` points with a two point lead.
    pub fn winner(&self, target: u32) -> Option<Side> {
        lead_winner(self.team_a, self.team_b, target)
    }

    fn is_zero(&self) -> bool {
        self.team_a == 0 && self.team_b == 0
    }
}

/// A canonical set, validated once at the input boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetScore {
    /// Set played in games, optionally decided by a tie-break.
    Regular {
        /// Games won by team A.
        games_a: u32,
        /// Games won by team B.
        games_b: u32,
        /// Tie-break score when the set went to a tie-break.
        tie_break: Option<TieBreakPoints>,
    },
    /// Deciding set replaced by a first-to-10 super tie-break.
    SuperTieBreak(TieBreakPoints),
}

impl SetScore {
    /// Regular set without tie-break.
    pub fn games(games_a: u32, games_b: u32) -> Self {
        SetScore::Regular {
            games_a,
            games_b,
            tie_break: None,
        }
    }

    /// Winner of the set under `format`, or `None` while the set is undecided.
    ///
    /// A side wins outright once it reaches `games_per_set` with a two game lead.
    /// When both sides reached `games_per_set - 1` games the tie-break result
    /// decides instead of the game count.
    pub fn winner(&self, format: &MatchFormat) -> Option<Side> {
        match self {
            SetScore::Regular {
                games_a,
                games_b,
                tie_break,
            } => {
                if let Some(side) = format.outright_set_winner(*games_a, *games_b) {
                    return Some(side);
                }
                if format.tie_break_reached(*games_a, *games_b) {
                    return tie_break.and_then(|points| points.winner(format.tie_break_at.into()));
                }
                None
            }
            SetScore::SuperTieBreak(points) => points.winner(SUPER_TIE_BREAK_POINTS),
        }
    }

    /// True when any game or point was recorded in this set.
    pub fn has_progress(&self) -> bool {
        match self {
            SetScore::Regular {
                games_a,
                games_b,
                tie_break,
            } => *games_a > 0 || *games_b > 0 || tie_break.is_some_and(|points| !points.is_zero()),
            SetScore::SuperTieBreak(points) => !points.is_zero(),
        }
    }
}

/// Full score of a match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchScore {
    /// Played or in-progress sets, in order.
    pub sets: Vec<SetScore>,
    /// Point of team A in the current game.
    pub current_game_point_a: GamePoint,
    /// Point of team B in the current game.
    pub current_game_point_b: GamePoint,
    /// Running tie-break points, mirrored from the super tie-break set when there is one.
    pub tie_break_point: Option<TieBreakPoints>,
    /// Side that withdrew, if the match was forfeited.
    pub forfeited_by: Option<Side>,
}

impl MatchScore {
    /// Score of a match that has not started.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether a side forfeited the match.
    pub fn forfeit(&self) -> bool {
        self.forfeited_by.is_some()
    }
}

/// Scoring rules of a tournament stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFormat {
    /// Sets needed to win the match.
    pub number_of_sets_to_win: u8,
    /// Games needed to win a set.
    pub games_per_set: u8,
    /// Points needed to win a regular tie-break.
    pub tie_break_at: u8,
    /// Whether the deciding set is replaced by a super tie-break.
    pub super_tie_break_in_final_set: bool,
    /// Advantage scoring at deuce (golden point otherwise).
    pub advantage: bool,
}

impl MatchFormat {
    /// Best of three sets, six games, tie-break to seven, super tie-break decider.
    pub fn padel_standard() -> Self {
        Self {
            number_of_sets_to_win: 2,
            games_per_set: 6,
            tie_break_at: 7,
            super_tie_break_in_final_set: true,
            advantage: false,
        }
    }

    /// Longest possible sequence of sets.
    pub fn max_sets(&self) -> usize {
        (2 * usize::from(self.number_of_sets_to_win)).saturating_sub(1)
    }

    /// Index of the set played as a super tie-break, if the format has one.
    ///
    /// Only multi-set matches have a deciding set distinct from the match itself.
    pub fn super_tie_break_index(&self) -> Option<usize> {
        (self.super_tie_break_in_final_set && self.number_of_sets_to_win >= 2)
            .then(|| self.max_sets() - 1)
    }

    /// Side that reached `games_per_set` games with a two game lead.
    pub fn outright_set_winner(&self, games_a: u32, games_b: u32) -> Option<Side> {
        lead_winner(games_a, games_b, self.games_per_set.into())
    }

    /// Whether both sides reached the tie-break threshold of `games_per_set - 1`.
    pub fn tie_break_reached(&self, games_a: u32, games_b: u32) -> bool {
        let threshold = u32::from(self.games_per_set).saturating_sub(1);
        games_a >= threshold && games_b >= threshold
    }
}

impl Validate for MatchFormat {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_sets_to_win(self.number_of_sets_to_win) {
            errors.add("numberOfSetsToWin", e);
        }
        if let Err(e) = validate_games_per_set(self.games_per_set) {
            errors.add("gamesPerSet", e);
        }
        if let Err(e) = validate_tie_break_at(self.tie_break_at) {
            errors.add("tieBreakAt", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// A scheduled match between two teams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Match identifier.
    pub id: MatchId,
    /// Display name of team A.
    pub team_a: String,
    /// Display name of team B.
    pub team_b: String,
    /// Current canonical score.
    pub score: MatchScore,
    /// Scoring rules.
    pub format: MatchFormat,
    /// Winner once the match is over.
    pub winner_side: Option<Side>,
    /// Whether the match is over.
    pub finished: bool,
}

impl Match {
    /// Create a match with an empty score.
    pub fn new(
        id: impl Into<MatchId>,
        team_a: impl Into<String>,
        team_b: impl Into<String>,
        format: MatchFormat,
    ) -> Self {
        Self {
            id: id.into(),
            team_a: team_a.into(),
            team_b: team_b.into(),
            score: MatchScore::empty(),
            format,
            winner_side: None,
            finished: false,
        }
    }
}

fn lead_winner(a: u32, b: u32, target: u32) -> Option<Side> {
    if a >= target && a.saturating_sub(b) >= 2 {
        Some(Side::TeamA)
    } else if b >= target && b.saturating_sub(a) >= 2 {
        Some(Side::TeamB)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn six_games() -> MatchFormat {
        MatchFormat {
            number_of_sets_to_win: 2,
            games_per_set: 6,
            tie_break_at: 7,
            super_tie_break_in_final_set: false,
            advantage: true,
        }
    }

    #[test]
    fn regular_set_needs_two_game_lead() {
        let format = six_games();
        assert_eq!(SetScore::games(6, 4).winner(&format), Some(Side::TeamA));
        assert_eq!(SetScore::games(5, 7).winner(&format), Some(Side::TeamB));
        assert_eq!(SetScore::games(6, 5).winner(&format), None);
        assert_eq!(SetScore::games(3, 1).winner(&format), None);
    }

    #[test]
    fn tie_break_decides_tied_sets() {
        let format = six_games();
        let set = SetScore::Regular {
            games_a: 6,
            games_b: 6,
            tie_break: Some(TieBreakPoints::new(5, 7)),
        };
        assert_eq!(set.winner(&format), Some(Side::TeamB));

        let unfinished = SetScore::Regular {
            games_a: 6,
            games_b: 6,
            tie_break: Some(TieBreakPoints::new(7, 6)),
        };
        assert_eq!(unfinished.winner(&format), None);
    }

    #[test]
    fn super_tie_break_is_first_to_ten_by_two() {
        let format = six_games();
        assert_eq!(
            SetScore::SuperTieBreak(TieBreakPoints::new(10, 8)).winner(&format),
            Some(Side::TeamA)
        );
        assert_eq!(
            SetScore::SuperTieBreak(TieBreakPoints::new(10, 9)).winner(&format),
            None
        );
        assert_eq!(
            SetScore::SuperTieBreak(TieBreakPoints::new(11, 13)).winner(&format),
            Some(Side::TeamB)
        );
    }

    #[test]
    fn super_tie_break_only_exists_in_multi_set_formats() {
        let mut format = MatchFormat::padel_standard();
        assert_eq!(format.super_tie_break_index(), Some(2));

        format.number_of_sets_to_win = 1;
        assert_eq!(format.super_tie_break_index(), None);
    }

    #[test]
    fn format_validation_rejects_unsupported_values() {
        let mut format = MatchFormat::padel_standard();
        assert!(format.validate().is_ok());

        format.games_per_set = 7;
        assert!(format.validate().is_err());

        format.games_per_set = 9;
        format.number_of_sets_to_win = 3;
        assert!(format.validate().is_err());
    }

    #[test]
    fn side_serializes_in_screaming_case() {
        assert_eq!(serde_json::to_string(&Side::TeamA).unwrap(), "\"TEAM_A\"");
        assert_eq!(
            serde_json::from_str::<GamePoint>("\"QUARANTE\"").unwrap(),
            GamePoint::Quarante
        );
    }
}
