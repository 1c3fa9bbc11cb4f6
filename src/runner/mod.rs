mod collection;
mod config;
mod orchestrator;
#[cfg(feature = "cli")]
pub mod printer;
mod report;
mod session;

#[cfg(feature = "cli")]
pub use collection::load_collection;
pub use collection::{Collection, Folder, RequestItem};
pub use config::{
    load_run_config, ConfigError, LoadedRunConfig, RunConfig, CONFIG_FILE_NAME,
    DEFAULT_REQUEST_TIMEOUT, MAX_DELAY_MS,
};
pub use orchestrator::{resolve_placeholders, CancelHandle, RunError, RunObserver, Runner};
pub use report::{write_report, RunReport, RunSummary, SessionInfo};
pub use session::{
    RequestError, RequestInfo, RequestResult, RequestStatus, RunSession, RunStatus, ScriptPhase,
    SessionError,
};
