use futures::future::BoxFuture;

use crate::dao::{
    models::{SaveScoreRequest, SavedScore},
    storage::SaveResult,
};

/// Abstraction over the persistence collaborator that records match scores.
pub trait ScoreStore: Send + Sync {
    /// Persist a score and return the collaborator's canonical version of it.
    fn save_score(&self, request: SaveScoreRequest) -> BoxFuture<'static, SaveResult<SavedScore>>;
}
