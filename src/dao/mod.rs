/// Request and response models exchanged with the persistence collaborator.
pub mod models;
/// Score persistence seam.
pub mod score_store;
/// Storage error types.
pub mod storage;
