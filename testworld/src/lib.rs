//! testworld - ephemeral container worlds for integration tests
//!
//! A [`World`] is a per-test namespace: one private network, any number of
//! [`ReplicaGroup`]s of identical containers, and an event timeline that is
//! rendered into a single log file when the world is destroyed.
//!
//! # Core Principle: Lazy Provisioning
//!
//! Adding containers never blocks the test:
//! - **Creation**: every replica is provisioned on its own background task
//! - **Use**: the first group operation waits for all members and surfaces
//!   any creation failure, naming the member
//! - **Teardown**: `destroy` waits for every pending creation, collects
//!   logs and terminates whatever exists, tolerating every failure on the way
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                            World                              │
//! │  ┌───────────────┐   ┌───────────────┐   ┌─────────────────┐  │
//! │  │ ReplicaGroup  │   │ ReplicaGroup  │   │    Timeline     │  │
//! │  │ w-alpine-1    │   │ w-caddy-1     │   │  (Gantt + logs) │  │
//! │  │ [slot][slot]  │   │ [slot]        │   └────────▲────────┘  │
//! │  └──────▲────────┘   └──────▲────────┘            │ events    │
//! │         │ publish           │ publish             │           │
//! │  ┌──────┴───────────────────┴─────────────────────┴────────┐  │
//! │  │      provisioning tasks (TaskSpawner, one per replica)   │  │
//! │  └──────────────────────────┬──────────────────────────────┘  │
//! └─────────────────────────────┼─────────────────────────────────┘
//!                               ▼
//!                     dyn ContainerProvider
//!               (Docker, or sim::SimProvider in tests)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use testworld::{ContainerSpec, World, WorldConfig};
//! use testworld::sim::{SimConfig, SimProvider};
//!
//! let provider = SimProvider::shared(SimConfig::default());
//! let mut world = World::new(WorldConfig::from_env("TestDns"), provider).await?;
//!
//! let servers = world.new_container(ContainerSpec::image("caddy").started().replicas(3)).await;
//! let client = world.new_container(ContainerSpec::image("alpine").started()).await;
//!
//! client.exec(["nslookup", servers.name()], 0).await?;
//! world.destroy().await;
//! ```

mod error;
mod exporter;
mod group;
mod slot;
mod spec;
mod timeline;
mod world;

pub mod runner;
pub mod scenarios;
pub mod sim;

pub use error::WorldError;
pub use exporter::{EventExport, TimelineExport};
pub use group::{member_layout, ReplicaGroup};
pub use runner::{ScenarioResult, ScenarioRunner};
pub use slot::{pending, PendingSlot, SlotResult, SlotWriter};
pub use spec::{basename, ContainerSpec, TeardownHook};
pub use timeline::{bar_geometry, render_gantt, Event, GanttRow, Timeline, TIMELINE_WIDTH};
pub use world::{World, WorldConfig, DEFAULT_GRACE_PERIOD, LOG_DIR_ENV};

pub use testworld_env::{
    ContainerFile, ContainerHandle, ContainerProvider, ExecProbe, ProviderError, ReadinessProbe,
};
