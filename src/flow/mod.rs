//! The device-linking flow: state machine, per-run session record, login
//! script and the orchestrator that ties the link-code client to the browser.

pub mod login;
pub mod orchestrator;
pub mod session;
pub mod state;

pub use login::{LoginCredentials, LoginScript};
pub use orchestrator::{DeviceAuthOrchestrator, FlowSettings};
pub use session::{AuthSession, SessionOutcome};
pub use state::{FlowOutcome, FlowState, FlowStep};
