// ABOUTME: Sandboxed execution of untrusted tasks
// ABOUTME: Project builder, runtime providers, container lifecycle and the task adapter

pub mod adapter;
pub mod error;
pub mod lifecycle;
pub mod ports;
pub mod providers;
pub mod scope;
pub mod settings;
pub mod types;
pub mod validation;
pub mod workspace;

pub use adapter::SandboxAdapter;
pub use error::{BuildError, ReadinessError, Result, SandboxError};
pub use lifecycle::{ContainerLifecycleManager, LaunchPlan, ReadinessState, RuntimeHandle};
pub use ports::{PortArena, PortLease};
pub use providers::{
    CommandOutput, DockerProvider, LocalProcessProvider, ProviderError, RuntimeProvider,
    UnitConfig, UnitId,
};
pub use scope::TaskScope;
pub use settings::{ProviderKind, RuntimeImages, SandboxSettings};
pub use types::{
    ErrorKind, Language, RuntimeKind, Task, TaskLimits, TaskPayload, TaskResult, TaskSpec,
    TaskStatus,
};
pub use workspace::{ProjectBuilder, Workspace};

pub use labrun_capture::{Artifact, RouteError};
