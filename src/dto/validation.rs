//! Validation helpers for match format fields.

use validator::ValidationError;

/// Game counts a set can be played to.
pub const SUPPORTED_GAMES_PER_SET: [u8; 5] = [4, 6, 9, 10, 15];

/// Validates that a match is played to one or two winning sets.
pub fn validate_sets_to_win(value: u8) -> Result<(), ValidationError> {
    if !(1..=2).contains(&value) {
        let mut err = ValidationError::new("sets_to_win_range");
        err.message = Some(format!("numberOfSetsToWin must be 1 or 2 (got {value})").into());
        return Err(err);
    }
    Ok(())
}

/// Validates that the games per set is one of [`SUPPORTED_GAMES_PER_SET`].
///
/// # Examples
///
/// ```ignore
/// validate_games_per_set(6)  // Ok
/// validate_games_per_set(7)  // Err - unsupported
/// ```
pub fn validate_games_per_set(value: u8) -> Result<(), ValidationError> {
    if !SUPPORTED_GAMES_PER_SET.contains(&value) {
        let mut err = ValidationError::new("games_per_set_unsupported");
        err.message = Some(
            format!("gamesPerSet must be one of {SUPPORTED_GAMES_PER_SET:?} (got {value})").into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Validates that a tie-break is played to at least one point.
pub fn validate_tie_break_at(value: u8) -> Result<(), ValidationError> {
    if value == 0 {
        let mut err = ValidationError::new("tie_break_at_range");
        err.message = Some("tieBreakAt must be strictly positive".into());
        return Err(err);
    }
    Ok(())
}
