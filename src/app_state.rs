use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{lab_directory::LabDirectory, queue::DispatchQueue};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<DispatchQueue>,
    pub labs: Arc<LabDirectory>,
}

impl AppState {
    pub fn new(db: PgPool, queue: DispatchQueue, labs: LabDirectory) -> Self {
        Self {
            db,
            queue: Arc::new(queue),
            labs: Arc::new(labs),
        }
    }
}
