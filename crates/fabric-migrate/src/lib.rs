// Provisioning tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # Fabric Migration Provisioning
//!
//! `fabric-migrate` is a CLI tool and library that provisions the Microsoft
//! Fabric side of a Synapse dedicated SQL pool migration: a warehouse, a
//! source connection and a multi-table copy job.
//!
//! ## What it handles
//!
//! | Concern | Module | Notes |
//! |---------|--------|-------|
//! | Credentials | [`auth`] | Service principal or pre-issued token |
//! | Async operations | [`client`] | 202 + `Location` polled to completion |
//! | Create if absent | [`creator`] | Absorbs name-propagation lag and races |
//! | Copy activities | [`assembler`] | One activity per `schema.table` |
//! | Definitions | [`reconciler`] | Staged, dual-endpoint, self-bisecting |
//! | Orchestration | [`provision`] | Warehouse, connection, copy job |
//!
//! ## Quick Start
//!
//! ```bash
//! fabric-migrate init --output provision.yaml
//! fabric-migrate plan --config provision.yaml
//! fabric-migrate provision --config provision.yaml
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! fabric:
//!   workspace_id: 00000000-0000-0000-0000-000000000000
//!
//! warehouse:
//!   name: MigratedWarehouse
//!
//! connection:
//!   server: myworkspace.sql.azuresynapse.net
//!   database: sales
//!
//! copy_job:
//!   name: SynapseToFabric
//!   tables: [dbo.Customers, dbo.Orders]
//! ```

#![warn(missing_docs)]

pub mod assembler;
pub mod auth;
pub mod client;
pub mod config;
pub mod creator;
pub mod error;
pub mod model;
pub mod provision;
pub mod reconciler;
pub mod resources;
pub mod retry;
pub mod source;
pub mod wire;

pub use assembler::{CopyJobAssembler, CopyJobBindings};
pub use auth::{ServicePrincipalTokenProvider, StaticTokenProvider, TokenProvider};
pub use client::{FabricClient, LroConfig, WorkspaceScope};
pub use config::{Overrides, ProvisionConfig};
pub use creator::{CreatorConfig, ResourceCreator, ResourceDirectory};
pub use error::{Error, Result};
pub use model::{Activity, CopyJobDefinition, ManagedResource, ResourceKind, Stage, StageKind};
pub use provision::{ProvisionOptions, ProvisionOutcome, ProvisionRequest, Provisioner};
pub use reconciler::{DefinitionEndpoints, Reconciler, UpdateEndpoint};
pub use retry::RetryConfig;
pub use source::{DiscoveryCache, FileTableSource, StaticTableSource, TableSource};
