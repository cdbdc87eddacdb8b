//! Self-modification machinery: the code-unit abstraction, the capability
//! registry, the sandboxed test runner, the VCS committer, and the
//! edit→test→revert→commit pipeline that composes them.

pub mod pipeline;
pub mod registry;
pub mod sandbox;
pub mod vcs;

pub use pipeline::{
    EditOutcome, ModificationApplier, ModificationPipeline, ModificationReport,
    ModificationRequest, RevertOutcome,
};
pub use registry::{Capability, CapabilityRegistry, CodeUnit};
pub use sandbox::{SandboxRunner, TestOutcome, UnitTester};
pub use vcs::{CommitOutcome, Committer, GitCommitter};
