mod batch;
mod lease;
mod records;
mod settings;

pub use batch::{BatchRepository, DeleteOutcome, MAX_LIST_LIMIT};
pub use lease::{BatchLease, LeaseOutcome};
pub use settings::SettingsRepository;
