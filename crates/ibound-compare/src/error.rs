use ibound_config::TargetId;

#[derive(Debug, thiserror::Error)]
pub enum CompareError {
  #[error("strategy '{0}' is not in the catalog")]
  UnknownStrategy(String),

  #[error("target {target} has two outcomes for strategy '{strategy}'")]
  Duplicate { target: TargetId, strategy: String },

  #[error("failed to serialize rows: {0}")]
  Serialize(#[from] serde_json::Error),
}
