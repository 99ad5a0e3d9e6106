//! Vista Core Library
//!
//! Secure artifact delivery and live preview for sandboxed rendering surfaces:
//! content-addressed bundles, capability URLs for repository files, git review
//! helpers, log fan-out and the agent event stream protocol.

pub mod agent;
pub mod broadcast;
pub mod build;
pub mod bundler;
pub mod capability;
pub mod config;
pub mod containment;
pub mod error;
pub mod metrics;
pub mod obs;
pub mod services;
pub mod store;
pub mod telemetry;
pub mod vcs;

pub use agent::{
    run_chat, AgentBackend, AgentEvent, AgentStream, ChatMessage, ChatRequest, EchoBackend, Entry,
    StreamError, Terminal, Transcript,
};
pub use broadcast::{BroadcastHub, BroadcastLayer, LogLine, SubscriberId, Subscription};
pub use build::{BuildArtifact, BuildOptions, BuildService};
pub use bundler::{assert_ascii, Bundler};
pub use capability::{
    Capability, CapabilityService, Clock, FileAccess, FileRequest, ManualClock, RedeemParams,
    RedeemedFile, Signer, SystemClock,
};
pub use config::{ConfigFile, SigningSecret, VistaConfig};
pub use containment::ProjectRoot;
pub use error::{Result, VistaError};
pub use services::Services;
pub use store::fs::FsArtifactStore;
pub use store::{ArtifactStore, Digest, StoreError, Version};
pub use vcs::{
    DiffOptions, OpOutcome, OpStatus, PatchTarget, RepoStatus, VcsService, WhitespaceReport,
    WhitespaceStatus,
};

pub use metrics::METRICS;
pub use obs::request_span;
pub use telemetry::init_tracing;

/// Vista version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
