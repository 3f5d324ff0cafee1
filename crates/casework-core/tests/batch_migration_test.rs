// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for batch migration orchestration and job execution.

mod common;

use common::{TestContext, case_model, human_task};

use casework_core::batch::BatchMigrationOrchestrator;
use casework_core::document::CaseInstanceMigrationDocument;
use casework_core::error::EngineError;
use casework_core::persistence::{Persistence, batch_part_result, batch_status};
use chrono::Utc;

/// Drive all currently queued jobs, pulling deferred timer jobs forward.
async fn drain_jobs(ctx: &TestContext, batch_id: &str) {
    let executor = ctx.job_executor();
    // Per-instance migration jobs are due immediately.
    executor.poll_once().await.unwrap();
    // The status check job is deferred; force it executable and run it.
    ctx.persistence
        .move_timer_jobs_to_executable(batch_id, Utc::now())
        .await
        .unwrap();
    executor.poll_once().await.unwrap();
}

#[tokio::test]
async fn test_batch_migrates_all_running_instances() {
    let ctx = TestContext::new().await;
    let model = case_model("claims", vec![human_task("planItemTaskA", "taskA")]);
    let v1 = ctx.deploy_definition("claims", 1, "", &model).await;
    let v2 = ctx.deploy_definition("claims", 2, "", &model).await;

    let case_1 = ctx.start_case(&v1, "", None).await;
    ctx.add_plan_item(&case_1, &v1, "planItemTaskA", "taskA", "active", None, false)
        .await;
    let case_2 = ctx.start_case(&v1, "", None).await;
    ctx.add_plan_item(&case_2, &v1, "planItemTaskA", "taskA", "active", None, false)
        .await;

    let orchestrator = BatchMigrationOrchestrator::new(ctx.persistence(), ctx.config.clone());
    let document = CaseInstanceMigrationDocument::builder()
        .to_case_definition_id(&v2)
        .build()
        .unwrap();
    let batch_id = orchestrator.batch_migrate(&v1, &document).await.unwrap();

    // Nothing has run yet: parts are waiting, batch is in progress.
    let pending = orchestrator.get_results(&batch_id).await.unwrap();
    assert_eq!(pending.counts.waiting, 2);
    assert!(!pending.is_completed());

    drain_jobs(&ctx, &batch_id).await;

    let results = orchestrator.get_results(&batch_id).await.unwrap();
    assert!(results.is_completed());
    assert_eq!(results.counts.successful, 2);
    assert_eq!(results.counts.failed, 0);
    assert_eq!(results.counts.total(), 2);

    for case_id in [&case_1, &case_2] {
        let instance = ctx
            .persistence
            .get_case_instance(case_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.case_definition_id, v2);
    }
}

#[tokio::test]
async fn test_failed_instance_does_not_poison_the_batch() {
    let ctx = TestContext::new().await;
    let model = case_model("claims", vec![human_task("planItemTaskA", "taskA")]);
    let v1 = ctx.deploy_definition("claims", 1, "", &model).await;
    let v2 = ctx.deploy_definition("claims", 2, "tenant-b", &model).await;

    // The destination lives in tenant-b: the tenant-b instance migrates, the
    // default-tenant instance fails its tenant check.
    let good = ctx.start_case(&v1, "tenant-b", None).await;
    ctx.add_plan_item(&good, &v1, "planItemTaskA", "taskA", "active", None, false)
        .await;
    let bad = ctx.start_case(&v1, "", None).await;
    ctx.add_plan_item(&bad, &v1, "planItemTaskA", "taskA", "active", None, false)
        .await;

    let orchestrator = BatchMigrationOrchestrator::new(ctx.persistence(), ctx.config.clone());
    let document = CaseInstanceMigrationDocument::builder()
        .to_case_definition_id(&v2)
        .build()
        .unwrap();
    let batch_id = orchestrator.batch_migrate(&v1, &document).await.unwrap();

    drain_jobs(&ctx, &batch_id).await;

    let results = orchestrator.get_results(&batch_id).await.unwrap();
    assert!(results.is_completed());
    assert_eq!(results.counts.successful, 1);
    assert_eq!(results.counts.failed, 1);

    let failed_part = results
        .parts
        .iter()
        .find(|p| p.case_instance_id == bad)
        .unwrap();
    assert_eq!(failed_part.result.as_deref(), Some(batch_part_result::FAIL));
    assert!(
        failed_part
            .message
            .as_deref()
            .unwrap()
            .contains("Tenant mismatch")
    );

    // The failed instance is untouched.
    let untouched = ctx
        .persistence
        .get_case_instance(&bad)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.case_definition_id, v1);

    let migrated = ctx
        .persistence
        .get_case_instance(&good)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(migrated.case_definition_id, v2);
}

#[tokio::test]
async fn test_batch_snapshot_skips_ended_instances() {
    let ctx = TestContext::new().await;
    let model = case_model("claims", vec![human_task("planItemTaskA", "taskA")]);
    let v1 = ctx.deploy_definition("claims", 1, "", &model).await;
    let v2 = ctx.deploy_definition("claims", 2, "", &model).await;

    ctx.start_case(&v1, "", None).await;
    ctx.start_case(&v1, "", Some(Utc::now())).await;

    let orchestrator = BatchMigrationOrchestrator::new(ctx.persistence(), ctx.config.clone());
    let document = CaseInstanceMigrationDocument::builder()
        .to_case_definition_id(&v2)
        .build()
        .unwrap();
    let batch_id = orchestrator.batch_migrate(&v1, &document).await.unwrap();

    let results = orchestrator.get_results(&batch_id).await.unwrap();
    assert_eq!(results.counts.total(), 1);
}

#[tokio::test]
async fn test_batch_selects_source_by_key_and_version() {
    let ctx = TestContext::new().await;
    let model = case_model("claims", vec![human_task("planItemTaskA", "taskA")]);
    let v1 = ctx.deploy_definition("claims", 1, "", &model).await;
    let v2 = ctx.deploy_definition("claims", 2, "", &model).await;

    let case_id = ctx.start_case(&v1, "", None).await;
    ctx.add_plan_item(&case_id, &v1, "planItemTaskA", "taskA", "active", None, false)
        .await;
    // An instance on version 2 is not part of the snapshot.
    ctx.start_case(&v2, "", None).await;

    let orchestrator = BatchMigrationOrchestrator::new(ctx.persistence(), ctx.config.clone());
    let document = CaseInstanceMigrationDocument::builder()
        .to_case_definition_id(&v2)
        .build()
        .unwrap();
    let batch_id = orchestrator
        .batch_migrate_by_key("claims", 1, "", &document)
        .await
        .unwrap();

    let results = orchestrator.get_results(&batch_id).await.unwrap();
    assert_eq!(results.counts.total(), 1);
    assert_eq!(results.parts[0].case_instance_id, case_id);

    let err = orchestrator
        .batch_migrate_by_key("claims", 9, "", &document)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CaseDefinitionKeyNotFound { .. }));
}

#[tokio::test]
async fn test_batch_for_unknown_definition_is_rejected() {
    let ctx = TestContext::new().await;
    let orchestrator = BatchMigrationOrchestrator::new(ctx.persistence(), ctx.config.clone());
    let document = CaseInstanceMigrationDocument::builder()
        .to_case_definition_id("somewhere")
        .build()
        .unwrap();

    let err = orchestrator
        .batch_migrate("no-such-definition", &document)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CaseDefinitionNotFound { .. }));
}

#[tokio::test]
async fn test_results_for_unknown_batch() {
    let ctx = TestContext::new().await;
    let orchestrator = BatchMigrationOrchestrator::new(ctx.persistence(), ctx.config.clone());

    let err = orchestrator.get_results("no-such-batch").await.unwrap_err();
    assert_eq!(err.error_code(), "BATCH_NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_drops_queued_jobs_and_keeps_results() {
    let ctx = TestContext::new().await;
    let model = case_model("claims", vec![human_task("planItemTaskA", "taskA")]);
    let v1 = ctx.deploy_definition("claims", 1, "", &model).await;
    let v2 = ctx.deploy_definition("claims", 2, "", &model).await;

    let case_id = ctx.start_case(&v1, "", None).await;
    ctx.add_plan_item(&case_id, &v1, "planItemTaskA", "taskA", "active", None, false)
        .await;

    let orchestrator = BatchMigrationOrchestrator::new(ctx.persistence(), ctx.config.clone());
    let document = CaseInstanceMigrationDocument::builder()
        .to_case_definition_id(&v2)
        .build()
        .unwrap();
    let batch_id = orchestrator.batch_migrate(&v1, &document).await.unwrap();

    orchestrator.cancel(&batch_id).await.unwrap();

    let due = ctx
        .persistence
        .list_due_jobs(Utc::now() + chrono::Duration::hours(1), 100)
        .await
        .unwrap();
    assert!(due.is_empty());

    let results = orchestrator.get_results(&batch_id).await.unwrap();
    assert_eq!(results.status, batch_status::COMPLETED);
    // The part never ran.
    assert_eq!(results.counts.waiting, 1);

    // The instance was never migrated.
    let instance = ctx
        .persistence
        .get_case_instance(&case_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(instance.case_definition_id, v1);
}

#[tokio::test]
async fn test_delete_removes_batch_and_parts() {
    let ctx = TestContext::new().await;
    let model = case_model("claims", vec![human_task("planItemTaskA", "taskA")]);
    let v1 = ctx.deploy_definition("claims", 1, "", &model).await;
    let v2 = ctx.deploy_definition("claims", 2, "", &model).await;
    ctx.start_case(&v1, "", None).await;

    let orchestrator = BatchMigrationOrchestrator::new(ctx.persistence(), ctx.config.clone());
    let document = CaseInstanceMigrationDocument::builder()
        .to_case_definition_id(&v2)
        .build()
        .unwrap();
    let batch_id = orchestrator.batch_migrate(&v1, &document).await.unwrap();

    orchestrator.delete(&batch_id).await.unwrap();

    let err = orchestrator.get_results(&batch_id).await.unwrap_err();
    assert!(matches!(err, EngineError::BatchNotFound { .. }));
}

#[tokio::test]
async fn test_status_check_reschedules_until_parts_complete() {
    let ctx = TestContext::new().await;
    let model = case_model("claims", vec![human_task("planItemTaskA", "taskA")]);
    let v1 = ctx.deploy_definition("claims", 1, "", &model).await;
    let v2 = ctx.deploy_definition("claims", 2, "", &model).await;

    let case_id = ctx.start_case(&v1, "", None).await;
    ctx.add_plan_item(&case_id, &v1, "planItemTaskA", "taskA", "active", None, false)
        .await;

    let orchestrator = BatchMigrationOrchestrator::new(ctx.persistence(), ctx.config.clone());
    let document = CaseInstanceMigrationDocument::builder()
        .to_case_definition_id(&v2)
        .build()
        .unwrap();
    let batch_id = orchestrator.batch_migrate(&v1, &document).await.unwrap();

    // Run only the status check first: the part has not completed, so the
    // batch stays in progress and the check reschedules itself.
    let migration_jobs: Vec<_> = ctx
        .persistence
        .list_due_jobs(Utc::now(), 100)
        .await
        .unwrap();
    for job in &migration_jobs {
        ctx.persistence.delete_job(&job.id).await.unwrap();
    }
    ctx.persistence
        .move_timer_jobs_to_executable(&batch_id, Utc::now())
        .await
        .unwrap();
    let executor = ctx.job_executor();
    executor.poll_once().await.unwrap();

    let results = orchestrator.get_results(&batch_id).await.unwrap();
    assert!(!results.is_completed());

    // A replacement status check job exists for the batch.
    let rescheduled = ctx
        .persistence
        .list_due_jobs(Utc::now() + chrono::Duration::hours(1), 100)
        .await
        .unwrap();
    assert!(
        rescheduled
            .iter()
            .any(|j| j.batch_id.as_deref() == Some(batch_id.as_str()))
    );
}
