pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A stored value that no longer parses, e.g. an unknown enum string.
    #[error("Corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },

    #[error("Stats serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
