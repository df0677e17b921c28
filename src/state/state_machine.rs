use serde_json::Value;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::score::RawSetInput,
    state::score::{GamePoint, Match, MatchFormat, MatchScore, SetScore, Side, TieBreakPoints},
};

/// Derived lifecycle of a match. Never stored, always recomputed from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Nothing has been recorded yet.
    NotStarted,
    /// At least one point or game was recorded and no side has won.
    InProgress,
    /// A side won the required number of sets.
    Finished {
        /// Side that won the match.
        winner: Side,
    },
    /// A side withdrew; overrides any set score.
    Forfeited {
        /// Opponent of the withdrawing side.
        winner: Side,
    },
}

/// Canonical score together with its completion verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedScore {
    /// Canonical score.
    pub score: MatchScore,
    /// Whether the match is over.
    pub finished: bool,
    /// Winner when the match is over.
    pub winner: Option<Side>,
    /// Lifecycle phase implied by the score.
    pub phase: MatchPhase,
}

/// Malformed score input. Raised before any state is touched.
///
/// Set numbers are 1-based positions in the submitted input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The match format itself is not playable.
    #[error("invalid match format: {0}")]
    InvalidFormat(String),
    /// More sets than `2 * numberOfSetsToWin - 1`.
    #[error("too many sets: the format allows {max}, got {got}")]
    TooManySets {
        /// Longest allowed sequence.
        max: usize,
        /// Submitted sequence length.
        got: usize,
    },
    /// A negative game or point count.
    #[error("set {set}: {field} must not be negative (got {value})")]
    NegativeValue {
        /// Set number.
        set: usize,
        /// Offending field.
        field: &'static str,
        /// Submitted value.
        value: i64,
    },
    /// A value that is not a whole number.
    #[error("set {set}: {field} is not a whole number (got `{raw}`)")]
    NotANumber {
        /// Set number.
        set: usize,
        /// Offending field.
        field: &'static str,
        /// Submitted value.
        raw: String,
    },
    /// Only one of the two game counts was filled in.
    #[error("set {set}: both teams need a score")]
    IncompleteSet {
        /// Set number.
        set: usize,
    },
    /// Only one of the two tie-break counts was filled in.
    #[error("set {set}: both tie-break scores are required")]
    IncompleteTieBreak {
        /// Set number.
        set: usize,
    },
    /// Tie-break points on a set that never reached the tie-break.
    #[error("set {set}: a tie-break is only played once both teams reached {threshold} games")]
    UnexpectedTieBreak {
        /// Set number.
        set: usize,
        /// Games both teams need before a tie-break.
        threshold: u32,
    },
    /// Super tie-break anywhere but the deciding set, or a regular deciding set
    /// when the format replaces it by a super tie-break.
    #[error("set {set}: the deciding set must be a super tie-break, and only the deciding set")]
    MisplacedSuperTieBreak {
        /// Set number.
        set: usize,
    },
    /// A set follows one that has no winner yet.
    #[error("set {set} follows a set that is not finished")]
    SetAfterUnfinishedSet {
        /// Set number.
        set: usize,
    },
    /// A set follows the one that decided the match.
    #[error("set {set} was recorded after the match was already decided")]
    SetAfterMatchDecided {
        /// Set number.
        set: usize,
    },
    /// `forfeit` is set but `forfeitedBy` is missing.
    #[error("forfeit recorded without the forfeiting side")]
    ForfeitWithoutSide,
}

impl From<ValidationErrors> for ValidationError {
    fn from(err: ValidationErrors) -> Self {
        ValidationError::InvalidFormat(err.to_string())
    }
}

/// Pure scoring rules: raw input in, canonical score and verdict out.
pub struct ScoreStateMachine;

impl ScoreStateMachine {
    /// Convert raw per-set input into a canonical score and decide completion.
    ///
    /// Absent sets are dropped, never read as zero. `forfeited_by` overrides any
    /// set score: the match is finished and won by the other side.
    pub fn derive(
        raw_sets: &[RawSetInput],
        format: &MatchFormat,
        forfeited_by: Option<Side>,
    ) -> Result<DerivedScore, ValidationError> {
        let sets = Self::parse_sets(raw_sets, format)?;
        let score = MatchScore {
            sets,
            forfeited_by,
            ..MatchScore::empty()
        };
        Self::evaluate(score, format)
    }

    /// Recompute the verdict of an externally supplied score from scratch.
    ///
    /// Used for save confirmations, realtime pushes and point-by-point results,
    /// including undo corrections that move a finished match back in progress.
    pub fn rederive(score: &MatchScore, format: &MatchFormat) -> Result<DerivedScore, ValidationError> {
        format.validate()?;
        check_shape(&score.sets, format)?;
        Self::evaluate(score.clone(), format)
    }

    /// Parse raw set input into canonical sets without judging the match.
    pub fn parse_sets(
        raw_sets: &[RawSetInput],
        format: &MatchFormat,
    ) -> Result<Vec<SetScore>, ValidationError> {
        format.validate()?;

        let max = format.max_sets();
        if raw_sets.len() > max {
            return Err(ValidationError::TooManySets {
                max,
                got: raw_sets.len(),
            });
        }

        let mut sets = Vec::with_capacity(raw_sets.len());
        for (index, raw) in raw_sets.iter().enumerate() {
            let set = index + 1;
            let games_a = parse_count(raw.team_a_score.as_ref(), set, "teamAScore")?;
            let games_b = parse_count(raw.team_b_score.as_ref(), set, "teamBScore")?;
            let tie_break_a = parse_count(raw.tie_break_team_a.as_ref(), set, "tieBreakTeamA")?;
            let tie_break_b = parse_count(raw.tie_break_team_b.as_ref(), set, "tieBreakTeamB")?;

            if games_a.is_none() && games_b.is_none() && tie_break_a.is_none() && tie_break_b.is_none()
            {
                continue;
            }

            let tie_break = match (tie_break_a, tie_break_b) {
                (None, None) => None,
                (Some(a), Some(b)) => Some(TieBreakPoints::new(a, b)),
                _ => return Err(ValidationError::IncompleteTieBreak { set }),
            };

            let parsed = if format.super_tie_break_index() == Some(sets.len()) {
                // Points live in the tie-break fields; older payloads put them in the set fields.
                let points = match (tie_break, games_a, games_b) {
                    (Some(points), _, _) => points,
                    (None, Some(a), Some(b)) => TieBreakPoints::new(a, b),
                    _ => return Err(ValidationError::IncompleteSet { set }),
                };
                SetScore::SuperTieBreak(points)
            } else {
                let (Some(games_a), Some(games_b)) = (games_a, games_b) else {
                    return Err(ValidationError::IncompleteSet { set });
                };
                SetScore::Regular {
                    games_a,
                    games_b,
                    tie_break,
                }
            };
            sets.push(parsed);
        }

        check_shape(&sets, format)?;
        Ok(sets)
    }

    fn evaluate(mut score: MatchScore, format: &MatchFormat) -> Result<DerivedScore, ValidationError> {
        let set_winner = match_winner(&score.sets, format)?;

        let super_tie_break = format
            .super_tie_break_index()
            .and_then(|index| score.sets.get(index))
            .and_then(|set| match set {
                SetScore::SuperTieBreak(points) => Some(*points),
                SetScore::Regular { .. } => None,
            });
        if super_tie_break.is_some() {
            score.tie_break_point = super_tie_break;
        }

        if set_winner.is_some() {
            score.current_game_point_a = GamePoint::Zero;
            score.current_game_point_b = GamePoint::Zero;
            score.tie_break_point = super_tie_break;
        }

        let (winner, phase) = match (score.forfeited_by, set_winner) {
            (Some(forfeiter), _) => {
                let winner = forfeiter.opponent();
                (Some(winner), MatchPhase::Forfeited { winner })
            }
            (None, Some(winner)) => (Some(winner), MatchPhase::Finished { winner }),
            (None, None) if has_progress(&score) => (None, MatchPhase::InProgress),
            (None, None) => (None, MatchPhase::NotStarted),
        };

        Ok(DerivedScore {
            score,
            finished: winner.is_some(),
            winner,
            phase,
        })
    }
}

impl Match {
    /// Replace the score with a derived one and copy its verdict.
    pub fn record(&mut self, derived: DerivedScore) -> MatchPhase {
        self.score = derived.score;
        self.finished = derived.finished;
        self.winner_side = derived.winner;
        derived.phase
    }

    /// Recompute `finished` and `winner_side` from the current score.
    pub fn refresh(&mut self) -> Result<MatchPhase, ValidationError> {
        let derived = ScoreStateMachine::rederive(&self.score, &self.format)?;
        Ok(self.record(derived))
    }
}

/// Placement rules that hold for any canonical set sequence.
fn check_shape(sets: &[SetScore], format: &MatchFormat) -> Result<(), ValidationError> {
    let max = format.max_sets();
    if sets.len() > max {
        return Err(ValidationError::TooManySets {
            max,
            got: sets.len(),
        });
    }

    let deciding = format.super_tie_break_index();
    for (index, set) in sets.iter().enumerate() {
        let number = index + 1;
        match set {
            SetScore::SuperTieBreak(_) if deciding != Some(index) => {
                return Err(ValidationError::MisplacedSuperTieBreak { set: number });
            }
            SetScore::Regular { .. } if deciding == Some(index) => {
                return Err(ValidationError::MisplacedSuperTieBreak { set: number });
            }
            SetScore::Regular {
                games_a,
                games_b,
                tie_break: Some(_),
            } => {
                let outright = format.outright_set_winner(*games_a, *games_b).is_some();
                if outright || !format.tie_break_reached(*games_a, *games_b) {
                    return Err(ValidationError::UnexpectedTieBreak {
                        set: number,
                        threshold: u32::from(format.games_per_set).saturating_sub(1),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Count set wins in order, rejecting sets that follow an unfinished set or the
/// set that decided the match.
fn match_winner(sets: &[SetScore], format: &MatchFormat) -> Result<Option<Side>, ValidationError> {
    let needed = u32::from(format.number_of_sets_to_win);
    let mut wins_a = 0u32;
    let mut wins_b = 0u32;
    let mut winner = None;

    for (index, set) in sets.iter().enumerate() {
        let number = index + 1;
        if winner.is_some() {
            return Err(ValidationError::SetAfterMatchDecided { set: number });
        }

        match set.winner(format) {
            Some(Side::TeamA) => wins_a += 1,
            Some(Side::TeamB) => wins_b += 1,
            None if number < sets.len() => {
                return Err(ValidationError::SetAfterUnfinishedSet { set: number + 1 });
            }
            None => {}
        }

        if wins_a >= needed {
            winner = Some(Side::TeamA);
        } else if wins_b >= needed {
            winner = Some(Side::TeamB);
        }
    }

    Ok(winner)
}

fn has_progress(score: &MatchScore) -> bool {
    score.sets.iter().any(SetScore::has_progress)
        || score.current_game_point_a != GamePoint::Zero
        || score.current_game_point_b != GamePoint::Zero
        || score
            .tie_break_point
            .is_some_and(|points| points.team_a > 0 || points.team_b > 0)
}

fn parse_count(
    value: Option<&Value>,
    set: usize,
    field: &'static str,
) -> Result<Option<u32>, ValidationError> {
    let not_a_number = |raw: String| ValidationError::NotANumber { set, field, raw };

    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => {
            if let Some(count) = number.as_u64() {
                return u32::try_from(count)
                    .map(Some)
                    .map_err(|_| not_a_number(number.to_string()));
            }
            match number.as_i64() {
                Some(negative) => Err(ValidationError::NegativeValue {
                    set,
                    field,
                    value: negative,
                }),
                None => Err(not_a_number(number.to_string())),
            }
        }
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            match trimmed.parse::<i64>() {
                Ok(parsed) if parsed < 0 => Err(ValidationError::NegativeValue {
                    set,
                    field,
                    value: parsed,
                }),
                Ok(parsed) => u32::try_from(parsed)
                    .map(Some)
                    .map_err(|_| not_a_number(text.clone())),
                Err(_) => Err(not_a_number(text.clone())),
            }
        }
        Some(other) => Err(not_a_number(other.to_string())),
    }
}
