//! One displayed score per match, merged from a local edit buffer, save
//! confirmations and realtime pushes.
//!
//! While an edit session is open, pushes land in a pending slot and never touch
//! the buffer. A successful save replaces buffer and pending slot at once; a
//! cancel reveals the newest known authoritative score. Pushes are applied in
//! arrival order, last applied wins.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::{
    dao::{models::SaveScoreRequest, score_store::ScoreStore, storage::SaveError},
    dto::{
        realtime::MatchUpdate,
        score::{MatchScoreDto, RawSetInput},
    },
    services::subscription_manager::{RealtimeError, Subscription, SubscriptionManager},
    state::{
        score::{MatchFormat, MatchId, MatchScore, Side, match_topic},
        state_machine::{DerivedScore, MatchPhase, ScoreStateMachine, ValidationError},
    },
};

/// Errors returned by coordinator operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no edit session is open")]
    NoEditSession,
    #[error("an edit session is already open")]
    EditInProgress,
    #[error("a save is already in flight")]
    SaveInFlight,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("save failed: {0}")]
    Save(#[from] SaveError),
}

impl SyncError {
    /// Whether retrying the same commit may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Save(err) => err.is_retryable(),
            SyncError::SaveInFlight => true,
            _ => false,
        }
    }
}

/// Authoritative score of a match with its derived verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSnapshot {
    pub score: MatchScore,
    pub finished: bool,
    pub winner: Option<Side>,
    pub phase: MatchPhase,
}

impl From<DerivedScore> for MatchSnapshot {
    fn from(derived: DerivedScore) -> Self {
        Self {
            score: derived.score,
            finished: derived.finished,
            winner: derived.winner,
            phase: derived.phase,
        }
    }
}

/// Raw editor state owned by the single open edit session.
#[derive(Debug, Clone, PartialEq)]
pub struct EditBuffer {
    pub sets: Vec<RawSetInput>,
    pub forfeited_by: Option<Side>,
    pub court: Option<String>,
    pub scheduled_time: Option<OffsetDateTime>,
}

impl EditBuffer {
    fn from_snapshot(snapshot: &MatchSnapshot) -> Self {
        let dto = MatchScoreDto::from(&snapshot.score);
        Self {
            sets: dto.sets.iter().map(RawSetInput::from).collect(),
            forfeited_by: snapshot.score.forfeited_by,
            court: None,
            scheduled_time: None,
        }
    }
}

/// What the UI shows for the match.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayedScore {
    /// Authoritative score.
    Live(MatchSnapshot),
    /// The local edit buffer.
    Editing(EditBuffer),
}

/// Typed notifications for the rest of the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// A save or push reported that the tournament changed as well.
    TournamentUpdated { match_id: MatchId },
}

/// Result of feeding a realtime push to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Displayed immediately.
    Applied,
    /// Structurally equal to the displayed score.
    Unchanged,
    /// Kept aside until the edit session ends.
    Buffered,
    /// Failed validation and was dropped.
    Rejected,
}

struct SyncState {
    authoritative: MatchSnapshot,
    pending: Option<MatchSnapshot>,
    edit: Option<EditBuffer>,
    saving: bool,
}

struct CoordinatorInner {
    match_id: MatchId,
    format: MatchFormat,
    store: Arc<dyn ScoreStore>,
    state: Mutex<SyncState>,
    displayed: watch::Sender<DisplayedScore>,
    notices: broadcast::Sender<SyncNotice>,
}

/// Coordinator for one match. Cheap to clone.
#[derive(Clone)]
pub struct OptimisticSyncCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl OptimisticSyncCoordinator {
    /// Start from `initial`, re-derived under `format`.
    pub fn new(
        match_id: impl Into<MatchId>,
        format: MatchFormat,
        initial: &MatchScore,
        store: Arc<dyn ScoreStore>,
    ) -> Result<Self, ValidationError> {
        let authoritative = MatchSnapshot::from(ScoreStateMachine::rederive(initial, &format)?);
        let (displayed, _receiver) = watch::channel(DisplayedScore::Live(authoritative.clone()));
        let (notices, _receiver) = broadcast::channel(16);

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                match_id: match_id.into(),
                format,
                store,
                state: Mutex::new(SyncState {
                    authoritative,
                    pending: None,
                    edit: None,
                    saving: false,
                }),
                displayed,
                notices,
            }),
        })
    }

    pub fn match_id(&self) -> &str {
        &self.inner.match_id
    }

    /// Latest authoritative score, ignoring any open edit.
    pub fn snapshot(&self) -> MatchSnapshot {
        self.lock().authoritative.clone()
    }

    /// Watch what should be displayed.
    pub fn displayed(&self) -> watch::Receiver<DisplayedScore> {
        self.inner.displayed.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.inner.notices.subscribe()
    }

    pub fn is_editing(&self) -> bool {
        self.lock().edit.is_some()
    }

    /// Open the edit session, seeded from the authoritative score.
    pub fn begin_edit(&self) -> Result<EditBuffer, SyncError> {
        let mut state = self.lock();
        if state.edit.is_some() {
            return Err(SyncError::EditInProgress);
        }
        let buffer = EditBuffer::from_snapshot(&state.authoritative);
        state.edit = Some(buffer.clone());
        self.inner
            .displayed
            .send_replace(DisplayedScore::Editing(buffer.clone()));
        Ok(buffer)
    }

    /// Replace the contents of the open edit buffer.
    pub fn update_edit(&self, buffer: EditBuffer) -> Result<(), SyncError> {
        let mut state = self.lock();
        if state.edit.is_none() {
            return Err(SyncError::NoEditSession);
        }
        if state.saving {
            return Err(SyncError::SaveInFlight);
        }
        state.edit = Some(buffer.clone());
        self.inner
            .displayed
            .send_replace(DisplayedScore::Editing(buffer));
        Ok(())
    }

    /// Validate and save the edit buffer.
    ///
    /// On success the confirmed score becomes authoritative and the buffer and
    /// any pending push are discarded. On any failure the buffer stays untouched.
    pub async fn commit(&self) -> Result<MatchSnapshot, SyncError> {
        let format = &self.inner.format;
        let (request, local) = {
            let mut state = self.lock();
            let buffer = state.edit.as_ref().ok_or(SyncError::NoEditSession)?;
            if state.saving {
                return Err(SyncError::SaveInFlight);
            }
            let local = ScoreStateMachine::derive(&buffer.sets, format, buffer.forfeited_by)?;
            let request = SaveScoreRequest {
                match_id: self.inner.match_id.clone(),
                score: MatchScoreDto::from(&local.score),
                court: buffer.court.clone(),
                scheduled_time: buffer.scheduled_time,
            };
            state.saving = true;
            (request, local)
        };

        let in_flight = SavingFlag { state: &self.inner.state };
        let result = self.inner.store.save_score(request).await;
        drop(in_flight);

        let saved = match result {
            Ok(saved) => saved,
            Err(err) => {
                warn!(
                    match_id = %self.inner.match_id,
                    error = %err,
                    retryable = err.is_retryable(),
                    "score save failed; edit buffer kept"
                );
                return Err(err.into());
            }
        };

        let confirmed = match saved
            .score
            .into_score(format)
            .and_then(|score| ScoreStateMachine::rederive(&score, format))
        {
            Ok(derived) => derived,
            Err(err) => {
                warn!(
                    match_id = %self.inner.match_id,
                    error = %err,
                    "save confirmation did not validate; keeping the locally derived score"
                );
                local
            }
        };
        if saved.winner != confirmed.winner {
            debug!(
                match_id = %self.inner.match_id,
                reported = ?saved.winner,
                derived = ?confirmed.winner,
                "store reported a different winner than the derived one"
            );
        }

        let snapshot = MatchSnapshot::from(confirmed);
        {
            let mut state = self.lock();
            state.authoritative = snapshot.clone();
            state.pending = None;
            state.edit = None;
            self.inner
                .displayed
                .send_replace(DisplayedScore::Live(snapshot.clone()));
        }
        info!(match_id = %self.inner.match_id, phase = ?snapshot.phase, "score saved");

        if saved.tournament_updated {
            self.notify_tournament_updated();
        }
        Ok(snapshot)
    }

    /// Drop the edit buffer and show the newest authoritative score.
    pub fn cancel_edit(&self) -> Result<MatchSnapshot, SyncError> {
        let mut state = self.lock();
        if state.edit.is_none() {
            return Err(SyncError::NoEditSession);
        }
        if state.saving {
            return Err(SyncError::SaveInFlight);
        }
        state.edit = None;
        if let Some(pending) = state.pending.take() {
            state.authoritative = pending;
        }
        let snapshot = state.authoritative.clone();
        self.inner
            .displayed
            .send_replace(DisplayedScore::Live(snapshot.clone()));
        Ok(snapshot)
    }

    /// Feed a realtime push for this match.
    pub fn apply_push(&self, update: MatchUpdate) -> PushOutcome {
        let format = &self.inner.format;
        let derived = match update
            .score
            .into_score(format)
            .and_then(|score| ScoreStateMachine::rederive(&score, format))
        {
            Ok(derived) => derived,
            Err(err) => {
                warn!(match_id = %self.inner.match_id, error = %err, "rejecting invalid realtime push");
                return PushOutcome::Rejected;
            }
        };
        if update.tournament_updated {
            self.notify_tournament_updated();
        }

        let snapshot = MatchSnapshot::from(derived);
        let mut state = self.lock();
        if state.edit.is_some() {
            debug!(match_id = %self.inner.match_id, "edit session open; push kept pending");
            state.pending = Some(snapshot);
            return PushOutcome::Buffered;
        }
        if state.authoritative == snapshot {
            return PushOutcome::Unchanged;
        }
        state.authoritative = snapshot.clone();
        self.inner
            .displayed
            .send_replace(DisplayedScore::Live(snapshot));
        PushOutcome::Applied
    }

    /// Route pushes for this match from `manager` into the coordinator.
    pub async fn attach(&self, manager: &SubscriptionManager) -> Result<Subscription, RealtimeError> {
        let coordinator = self.clone();
        manager
            .subscribe(match_topic(&self.inner.match_id), move |update| {
                coordinator.apply_push(update);
            })
            .await
    }

    fn notify_tournament_updated(&self) {
        let _ = self.inner.notices.send(SyncNotice::TournamentUpdated {
            match_id: self.inner.match_id.clone(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        lock_state(&self.inner.state)
    }
}

fn lock_state(state: &Mutex<SyncState>) -> MutexGuard<'_, SyncState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the saving flag when the save completes or the commit is dropped.
struct SavingFlag<'a> {
    state: &'a Mutex<SyncState>,
}

impl Drop for SavingFlag<'_> {
    fn drop(&mut self) {
        lock_state(self.state).saving = false;
    }
}
