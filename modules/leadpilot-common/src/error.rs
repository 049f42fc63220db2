use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeadPilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Plan limit reached: {0}")]
    PlanLimit(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
