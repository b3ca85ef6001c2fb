//! # templar-core
//!
//! Build orchestration for VM templates on a hypervisor cluster.
//!
//! A [`Build`] turns one [`BuildSpec`] into a template by running a fixed
//! pipeline of steps against a [`ControlPlane`]. Device slots are planned
//! up front by [`templar_vm::allocate`], so a build that cannot fit its
//! devices fails before anything is created.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   templar-core (host)                    │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │     Build       │────▶│  StepRunner              │   │
//! │  │   - run()       │     │  run in order,           │   │
//! │  │   - steps()     │     │  clean up in reverse     │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │           │                          │                   │
//! │           ▼                          ▼                   │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │   BuildState    │◀────│  Steps                   │   │
//! │  │  (per build)    │     │  discover-clone-source   │   │
//! │  └─────────────────┘     │  resolve-isos            │   │
//! │                          │  create-vm               │   │
//! │                          │  start-vm                │   │
//! │  ┌─────────────────┐     │  provision               │   │
//! │  │  Provisioner    │◀────│  unmount-media           │   │
//! │  └─────────────────┘     │  convert-to-template     │   │
//! │                          │  finalize                │   │
//! │                          └──────────────────────────┘   │
//! │                                      │                   │
//! └──────────────────────────────────────┼───────────────────┘
//!                                        ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │               ControlPlane (cluster API)                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! `discover-clone-source` runs only for clone builds.
//!
//! ## Quick Start
//!
//! ```ignore
//! use templar_core::{Build, BuildSettings, BuildSpec};
//! use templar_vm::{BusFamily, DiskSpec, IsoSource, IsoSpec};
//!
//! # async fn example(client: std::sync::Arc<dyn templar_core::ControlPlane>,
//! #                  provisioner: std::sync::Arc<dyn templar_core::Provisioner>)
//! #     -> Result<(), templar_core::BuildError> {
//! let spec = BuildSpec::builder()
//!     .name("debian-12")
//!     .node("pve1")
//!     .disk(DiskSpec::new(BusFamily::Scsi, "local-lvm", 20))
//!     .iso(IsoSpec::dynamic(BusFamily::Ide, IsoSource::volume("local:iso/debian-12.iso")).unmounted(false))
//!     .build()
//!     .expect("valid spec");
//!
//! let artifact = Build::new(spec, client, provisioner)
//!     .with_settings(BuildSettings::from_env())
//!     .run()
//!     .await?;
//! println!("{}", artifact.description());
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **ISO and clone builds**: Fresh installs or clones of an existing VM
//! - **Deterministic slots**: Pinned ISOs, disks, then remaining ISOs
//! - **Duplicate-ID retry**: Cluster-assigned identifiers retried on collision
//! - **Reverse cleanup**: A failed build leaves no VM behind, or says so
//! - **Cancellation**: Every remote wait is raced against a cancellation token

mod artifact;
mod build;
mod client;
mod config;
mod error;
mod host;
mod provision;
mod retry;
mod runner;
mod state;
mod step;
pub mod steps;

pub use artifact::{Artifact, ArtifactKind};
pub use build::{run_builds, Build};
pub use client::{ConfigChange, ControlPlane, GuestInterface, RemoteError, VmConfig, VmRef};
pub use config::{
    BuildFlavor, BuildSettings, BuildSpec, BuildSpecBuilder, CloneSourceRef, ConnectSpec,
    HostStrategy, MIN_VM_ID,
};
pub use error::{BuildError, CleanupFailure, CoreError, Result};
pub use host::{resolve_host, select_address};
pub use provision::{ProvisionTarget, Provisioner};
pub use retry::{DuplicateIdRetry, RetryDecision};
pub use runner::{RunOutcome, StepRunner};
pub use state::{BuildId, BuildPhase, BuildState};
pub use step::{BuildContext, Step};
