//! Racing multi-strategy patch engine.
//!
//! A job clones a repository once, asks the content generator for a plan
//! (the set of files to touch), then races several generation strategies on
//! isolated copies of the checkout. The first attempt whose changes pass the
//! validation gates wins; it is committed, pushed and opened as a pull
//! request. Every other attempt is cancelled and its workspace deleted.
//!
//! Entry point: [`JobOrchestrator`].

pub mod config;
pub mod errors;
pub mod executor;
pub mod generator;
pub mod hosting;
pub mod orchestrator;
pub mod plan;
pub mod prompts;
pub mod publisher;
pub mod race;
pub mod source;
pub mod strategy;
pub mod telemetry;
pub mod workspace;

pub use config::{ConfigError, RacerConfig};
pub use errors::{AttemptError, AttemptFailure, ErrorScope, GenerationError, JobError, PublishStage};
pub use executor::{AgentExecutor, ApplySummary, GateValidator, Validator};
pub use generator::{ContentGenerator, FileRequest, RigGenerator};
pub use hosting::{GitHubClient, HostingClient, HostingError, PullRequestRef};
pub use orchestrator::{JobHandle, JobOrchestrator, JobPhase, JobReport, JobRequest, JobStatus};
pub use plan::{build_plan, Plan};
pub use publisher::Publisher;
pub use race::{AgentAttempt, AttemptStatus, RaceCoordinator, RaceProgress, RaceResult};
pub use source::{Credential, GitSource, RepoRef, SourceFetcher};
pub use strategy::Strategy;
pub use workspace::{Workspace, WorkspaceKind, WorkspaceManager};
