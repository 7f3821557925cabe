pub mod reclamation;

pub use reclamation::{ReclamationConfig, ReclamationReport, ReclamationWorker};
