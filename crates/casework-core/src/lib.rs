// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Casework Core - Case Instance Migration Engine
//!
//! This crate migrates running and ended case instances between versions of a
//! case definition. A migration rewrites the instance's plan item tree against
//! the destination model, re-links sentry state, and re-nests stages, all
//! within a single transaction so a failed migration leaves the instance
//! untouched.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Embedding Application                         │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         MigrationEngine                              │
//! │                                                                      │
//! │  ┌─────────────┐  ┌──────────────┐  ┌───────────┐  ┌─────────────┐  │
//! │  │  Validator  │  │   Migrator   │  │  History  │  │    Batch    │  │
//! │  │ (read-only) │  │  (runtime)   │  │  (ended)  │  │(orchestrate)│  │
//! │  └─────────────┘  └──────────────┘  └───────────┘  └──────┬──────┘  │
//! │                                                           │ jobs    │
//! │                                                    ┌──────▼──────┐  │
//! │                                                    │ JobExecutor │  │
//! │                                                    │  (polling)  │  │
//! │                                                    └─────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         SQLite (sqlx)                                │
//! │   definitions, instances, plan items, sentries, tasks, batches       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Migration Document
//!
//! A [`document::CaseInstanceMigrationDocument`] names the destination
//! definition (by id, or by key + version + tenant), an optional set of plan
//! item mappings and optional variable overrides:
//!
//! | Mapping | Effect |
//! |---------|--------|
//! | `activate` | Instance becomes ACTIVE; tasks/subscriptions are created |
//! | `terminate` | Instance terminates; stages terminate their subtree first |
//! | `moveToAvailable` | Instance regresses or is created in AVAILABLE |
//! | `waitingForRepetition` | Instance parks in the repetition holding state |
//! | `removeWaitingForRepetition` | Parked instances are terminated |
//!
//! # Plan Item Instance State Machine
//!
//! ```text
//!                ┌───────────┐
//!                │ AVAILABLE │◄──────────────┐
//!                └─────┬─────┘               │
//!                      │ sentry fires        │ repetition
//!                      ▼                     │
//!                ┌───────────┐     ┌─────────┴──────────────┐
//!          ┌─────│  ACTIVE   │────►│ WAITING_FOR_REPETITION │
//!          │     └─────┬─────┘     └─────────┬──────────────┘
//!          │           │                     │ terminate
//!     complete    terminate                  ▼
//!          │           │              ┌────────────┐
//!          ▼           ▼              │ TERMINATED │
//!    ┌───────────┐ ┌────────────┐     └────────────┘
//!    │ COMPLETED │ │ TERMINATED │
//!    └───────────┘ └────────────┘
//! ```
//!
//! `COMPLETED` and `TERMINATED` are terminal. `WAITING_FOR_REPETITION` is a
//! live holding state for repeatable plan items.
//!
//! # Batch Migration
//!
//! [`batch::BatchMigrationOrchestrator`] snapshots the instances of a source
//! definition, records one batch part per instance and schedules one job per
//! part. Parts fail independently; a failed instance records its error on its
//! part and never blocks the others. A deferred status check job completes the
//! batch once every part has reported.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CASEWORK_JOB_POLL_INTERVAL_MS` | No | `500` | Job executor poll interval |
//! | `CASEWORK_JOB_BATCH_SIZE` | No | `10` | Jobs picked up per poll round |
//! | `CASEWORK_BATCH_STATUS_CHECK_INTERVAL_MS` | No | `5000` | Batch status recheck delay |
//! | `CASEWORK_DEFAULT_TENANT_FALLBACK` | No | `false` | Look up definitions in the default tenant when the instance tenant has none |
//! | `CASEWORK_DEFAULT_TENANT_ID` | No | `` | Tenant id used by the fallback |
//!
//! # Modules
//!
//! - [`config`]: Engine configuration from environment variables
//! - [`definition`]: Case definition model (plan items, stages, sentries)
//! - [`document`]: Migration document and its builder
//! - [`validator`]: Read-only document validation
//! - [`migrator`]: Runtime case instance migration
//! - [`history`]: Ended case instance migration
//! - [`batch`]: Batch migration orchestration
//! - [`jobs`]: Job handlers and the polling executor
//! - [`persistence`]: Storage trait and the SQLite backend
//! - [`runtime`]: Embeddable [`runtime::MigrationEngine`]

#![deny(missing_docs)]

/// Batch migration orchestration and result projection.
pub mod batch;

/// If-part condition evaluation seam.
pub mod condition;

/// Engine configuration loaded from environment variables.
pub mod config;

/// Case definition model types.
pub mod definition;

/// Migration document types and builder.
pub mod document;

/// Error types for migration operations with error code mapping.
pub mod error;

/// Migration of ended case instances.
pub mod history;

/// Job handlers and the polling job executor.
pub mod jobs;

/// Runtime case instance migration.
pub mod migrator;

/// Storage trait, record types and the SQLite backend.
pub mod persistence;

/// Embeddable migration engine with background job execution.
pub mod runtime;

/// Plan item instance tree snapshot used by the migrator.
pub mod tree;

/// Read-only validation of migration documents.
pub mod validator;
