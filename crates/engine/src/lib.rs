pub mod approvals;
pub mod bus;
pub mod executor;
pub mod limits;
pub mod orchestrator;
pub mod policies;

pub use approvals::ApprovalGate;
pub use bus::{BusEvent, EventBus, EventKind};
pub use executor::{ActionExecutor, ExecutorError, NoopExecutor, PlannedAction};
pub use limits::{ExecutionControls, RateDecision};
pub use orchestrator::{ExecuteOutcome, ExecuteRequest, Orchestrator};
pub use policies::{FlowService, ProfileService};
