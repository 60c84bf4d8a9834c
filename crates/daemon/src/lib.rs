pub mod authorize;
pub mod callback;
pub mod config;
pub mod orchestrator;
pub mod schedule;

pub use authorize::{authorize, AuthSettings, Session, STATE_TOKEN};
pub use callback::CallbackListener;
pub use orchestrator::{run_backup, RunPlan, RunReport, RunStage};
pub use schedule::Schedule;
