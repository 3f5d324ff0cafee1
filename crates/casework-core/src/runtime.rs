// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable migration engine.
//!
//! This module provides [`MigrationEngine`] which allows embedding the case
//! migration services into an existing tokio application.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use casework_core::runtime::MigrationEngine;
//! use casework_core::persistence::SqlitePersistence;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let persistence = Arc::new(SqlitePersistence::in_memory().await?);
//!
//!     let engine = MigrationEngine::builder()
//!         .persistence(persistence)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... migrate case instances ...
//!
//!     // Graceful shutdown
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::batch::BatchMigrationOrchestrator;
use crate::condition::{ConditionEvaluator, VariableConditionEvaluator};
use crate::config::EngineConfig;
use crate::history::HistoricCaseInstanceMigrator;
use crate::jobs::{
    BatchStatusCheckJobHandler, CaseMigrationJobHandler, HistoricCaseMigrationJobHandler,
    JobExecutor,
};
use crate::migrator::{CaseInstanceMigrator, PositionalSentryPartMatcher, SentryPartMatcher};
use crate::persistence::Persistence;
use crate::validator::MigrationValidator;

/// Builder for creating a [`MigrationEngine`].
pub struct MigrationEngineBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    config: EngineConfig,
    condition_evaluator: Option<Arc<dyn ConditionEvaluator>>,
    sentry_matcher: Option<Arc<dyn SentryPartMatcher>>,
}

impl std::fmt::Debug for MigrationEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationEngineBuilder")
            .field("persistence", &self.persistence.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .finish()
    }
}

impl Default for MigrationEngineBuilder {
    fn default() -> Self {
        Self {
            persistence: None,
            config: EngineConfig::default(),
            condition_evaluator: None,
            sentry_matcher: None,
        }
    }
}

impl MigrationEngineBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the engine configuration.
    ///
    /// Default: [`EngineConfig::default`]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the if-part condition evaluator.
    ///
    /// Default: [`VariableConditionEvaluator`]
    pub fn condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.condition_evaluator = Some(evaluator);
        self
    }

    /// Set the sentry part matching strategy.
    ///
    /// Default: [`PositionalSentryPartMatcher`]
    pub fn sentry_matcher(mut self, matcher: Arc<dyn SentryPartMatcher>) -> Self {
        self.sentry_matcher = Some(matcher);
        self
    }

    /// Build the engine configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<MigrationEngineSetup> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;

        Ok(MigrationEngineSetup {
            persistence,
            config: self.config,
            condition_evaluator: self
                .condition_evaluator
                .unwrap_or_else(|| Arc::new(VariableConditionEvaluator)),
            sentry_matcher: self
                .sentry_matcher
                .unwrap_or_else(|| Arc::new(PositionalSentryPartMatcher)),
        })
    }
}

/// Configuration for a [`MigrationEngine`].
pub struct MigrationEngineSetup {
    persistence: Arc<dyn Persistence>,
    config: EngineConfig,
    condition_evaluator: Arc<dyn ConditionEvaluator>,
    sentry_matcher: Arc<dyn SentryPartMatcher>,
}

impl std::fmt::Debug for MigrationEngineSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationEngineSetup")
            .field("persistence", &"...")
            .field("config", &self.config)
            .finish()
    }
}

impl MigrationEngineSetup {
    /// Start the engine, spawning the job executor task.
    pub async fn start(self) -> Result<MigrationEngine> {
        let validator = Arc::new(MigrationValidator::new(
            Arc::clone(&self.persistence),
            self.config.clone(),
        ));
        let migrator = Arc::new(CaseInstanceMigrator::new(
            Arc::clone(&self.persistence),
            self.config.clone(),
            Arc::clone(&self.condition_evaluator),
            Arc::clone(&self.sentry_matcher),
        ));
        let history = Arc::new(HistoricCaseInstanceMigrator::new(
            Arc::clone(&self.persistence),
            self.config.clone(),
        ));
        let batch = Arc::new(BatchMigrationOrchestrator::new(
            Arc::clone(&self.persistence),
            self.config.clone(),
        ));

        let mut executor = JobExecutor::new(Arc::clone(&self.persistence), &self.config);
        executor.register(Arc::new(CaseMigrationJobHandler::new(
            Arc::clone(&self.persistence),
            Arc::clone(&migrator),
        )));
        executor.register(Arc::new(HistoricCaseMigrationJobHandler::new(
            Arc::clone(&self.persistence),
            Arc::clone(&history),
        )));
        executor.register(Arc::new(BatchStatusCheckJobHandler::new(
            Arc::clone(&self.persistence),
            self.config.batch_status_check_interval,
        )));

        let shutdown = Arc::new(Notify::new());
        let executor_handle = tokio::spawn(executor.run(Arc::clone(&shutdown)));

        info!("MigrationEngine started");

        Ok(MigrationEngine {
            persistence: self.persistence,
            validator,
            migrator,
            history,
            batch,
            executor_handle,
            shutdown,
        })
    }
}

/// A running migration engine that can be embedded in an application.
///
/// The engine manages:
/// - the migration services (validator, migrators, batch orchestrator)
/// - a background job executor processing batch migration jobs
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct MigrationEngine {
    persistence: Arc<dyn Persistence>,
    validator: Arc<MigrationValidator>,
    migrator: Arc<CaseInstanceMigrator>,
    history: Arc<HistoricCaseInstanceMigrator>,
    batch: Arc<BatchMigrationOrchestrator>,
    executor_handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl MigrationEngine {
    /// Create a new builder for configuring the engine.
    pub fn builder() -> MigrationEngineBuilder {
        MigrationEngineBuilder::new()
    }

    /// Get a reference to the persistence layer.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// The document validator.
    pub fn validator(&self) -> &Arc<MigrationValidator> {
        &self.validator
    }

    /// The runtime case instance migrator.
    pub fn migrator(&self) -> &Arc<CaseInstanceMigrator> {
        &self.migrator
    }

    /// The ended case instance migrator.
    pub fn history(&self) -> &Arc<HistoricCaseInstanceMigrator> {
        &self.history
    }

    /// The batch migration orchestrator.
    pub fn batch(&self) -> &Arc<BatchMigrationOrchestrator> {
        &self.batch
    }

    /// Check if the background job executor is still running.
    pub fn is_running(&self) -> bool {
        !self.executor_handle.is_finished()
    }

    /// Gracefully shut down the engine.
    ///
    /// This signals the job executor to stop polling and waits for the
    /// in-flight poll round to finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("MigrationEngine shutting down...");

        self.shutdown.notify_one();

        match self.executor_handle.await {
            Ok(()) => {
                info!("MigrationEngine shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("MigrationEngine job executor panicked: {}", e);
                Err(anyhow::anyhow!("job executor task panicked: {}", e))
            }
        }
    }
}
