// ==========================================
// 导入服务端到端测试
// ==========================================
// 测试目标: 文件 → 识别 → 分类 → 映射 → 分批写入 → 回滚 的完整链路
// 覆盖范围: ImportService + SQLite（任务 / 映射 / 记录）
// ==========================================

mod test_helpers;

use pos_import::domain::DqLevel;
use pos_import::importer::ImportRequest;
use pos_import::repository::{
    ImportMappingRepository, RecordSink, SqliteImportMappingRepository, SqliteRecordSink,
};
use pos_import::{
    FailureReason, FormatType, ImportError, ImportStatus, ImportType, ProgressPhase,
};
use serde_json::json;
use test_helpers::{batch_config, create_service, create_test_db, menu_csv, open_shared, write_source};
use uuid::Uuid;

#[tokio::test]
async fn test_menu_import_completes() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let service = create_service(&db_path, batch_config(10, dir.path()));
    let source = write_source(&dir, "menu.csv", menu_csv(25).as_bytes());

    let job = service
        .import(ImportRequest::new("Lunch menu", ImportType::Menu, source))
        .await
        .unwrap();

    assert_eq!(job.status, ImportStatus::Completed);
    assert_eq!(job.counters.total, 25);
    assert_eq!(job.counters.processed, 25);
    assert_eq!(job.counters.successful, 25);
    assert_eq!(job.counters.failed, 0);
    assert_eq!(job.progress_percentage, 100.0);
    assert_eq!(job.data_quality_score, Some(100.0));
    assert_eq!(job.import_results.batches_completed, 3);
    assert!(!job.import_results.parallel);
    assert!(job.can_rollback);
    assert!(job.field_mapping_snapshot.is_some());

    let classification = job.import_results.classification.as_ref().unwrap();
    assert_eq!(classification.format_type, FormatType::TransactionData);

    let snapshot = service.get_progress(&job.job_id).unwrap();
    assert_eq!(snapshot.phase, ProgressPhase::Completed);
    assert_eq!(snapshot.progress_percentage, 100.0);
    assert_eq!(snapshot.successful, 25);

    let sink = SqliteRecordSink::new(open_shared(&db_path));
    let rows = sink.load_job_records(&job.job_id).await.unwrap();
    assert_eq!(rows.len(), 25);
    let first = rows.iter().find(|r| r.row_number == 1).unwrap();
    assert_eq!(first.get_str("name"), Some("Dish 0001"));
    assert_eq!(first.get_str("sku"), Some("SKU0001"));
    assert_eq!(first.get_f64("price"), Some(5.0));

    let stored = service.get_job(&job.job_id).await.unwrap();
    assert_eq!(stored.status, ImportStatus::Completed);
    assert_eq!(stored.counters, job.counters);
}

#[tokio::test]
async fn test_saved_mapping_is_reused() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let service = create_service(&db_path, batch_config(50, dir.path()));

    for (file, rows) in [("monday.csv", 5), ("tuesday.csv", 7)] {
        let source = write_source(&dir, file, menu_csv(rows).as_bytes());
        let job = service
            .import(ImportRequest::new(file, ImportType::Menu, source))
            .await
            .unwrap();
        assert_eq!(job.status, ImportStatus::Completed);
    }

    let mappings = SqliteImportMappingRepository::new(open_shared(&db_path))
        .list(ImportType::Menu, None)
        .await
        .unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].usage_count, 2);
    assert_eq!(mappings[0].target_for("Selling Price"), Some("price"));
}

#[tokio::test]
async fn test_row_level_issues_are_counted_not_fatal() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let service = create_service(&db_path, batch_config(4, dir.path()));
    let content = "Item Name,Item Code,Selling Price\n\
                   Burger,SKU1,9.50\n\
                   Fries,SKU2,3.25\n\
                   Soda,SKU3,2\n\
                   Burger Deluxe,sku1,11\n\
                   Salad,SKU5,N/A\n\
                   Soup,SKU6,-4.00\n\
                   ,,\n";
    let source = write_source(&dir, "menu_issues.csv", content.as_bytes());

    let job = service
        .import(ImportRequest::new("issues", ImportType::Menu, source))
        .await
        .unwrap();

    assert_eq!(job.status, ImportStatus::Completed);
    assert_eq!(job.counters.processed, 6);
    assert_eq!(job.counters.successful, 3);
    assert_eq!(job.counters.skipped, 1);
    assert_eq!(job.counters.failed, 2);
    assert!(job.counters.is_consistent());
    assert!(job
        .validation_errors
        .iter()
        .any(|v| v.level == DqLevel::Error && v.row_number == Some(6)));
    assert!(job.data_quality_score.unwrap() < 100.0);
}

#[tokio::test]
async fn test_rollback_removes_committed_rows_once() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let service = create_service(&db_path, batch_config(4, dir.path()));
    let source = write_source(&dir, "menu.csv", menu_csv(10).as_bytes());

    let job = service
        .import(ImportRequest::new("menu", ImportType::Menu, source))
        .await
        .unwrap();
    assert!(job.can_rollback);
    let sink = SqliteRecordSink::new(open_shared(&db_path));
    assert_eq!(sink.count_job_records(&job.job_id).await.unwrap(), 10);

    let rolled_back = service.rollback(&job.job_id).await.unwrap();
    assert!(!rolled_back.can_rollback);
    assert!(rolled_back.rollback_data.is_none());
    assert_eq!(sink.count_job_records(&job.job_id).await.unwrap(), 0);

    let again = service.rollback(&job.job_id).await;
    assert!(matches!(again, Err(ImportError::RollbackUnavailable(_))));
    assert!(!service.get_job(&job.job_id).await.unwrap().can_rollback);
}

#[tokio::test]
async fn test_unreadable_inputs_fail_with_format_reason() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let service = create_service(&db_path, batch_config(10, dir.path()));

    for (file, content) in [("scan.pdf", &b"%PDF-1.4 binary"[..]), ("empty.csv", &b""[..])] {
        let source = write_source(&dir, file, content);
        let job = service
            .import(ImportRequest::new(file, ImportType::Menu, source))
            .await
            .unwrap();
        assert_eq!(job.status, ImportStatus::Failed, "{}", file);
        assert_eq!(job.error_detail.as_ref().unwrap().reason, FailureReason::Format);
        assert!(!job.can_rollback);
    }
}

#[tokio::test]
async fn test_large_file_runs_in_parallel() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut config = batch_config(5, dir.path());
    config.max_concurrency = 3;
    let service = create_service(&db_path, config);
    let source = write_source(&dir, "menu.csv", menu_csv(40).as_bytes());

    let job = service
        .import(ImportRequest::new("big menu", ImportType::Menu, source))
        .await
        .unwrap();

    assert_eq!(job.status, ImportStatus::Completed);
    assert!(job.import_results.parallel);
    assert_eq!(job.counters.successful, 40);
    assert_eq!(job.import_results.batches_completed, 8);
    let sink = SqliteRecordSink::new(open_shared(&db_path));
    assert_eq!(sink.count_job_records(&job.job_id).await.unwrap(), 40);
}

#[tokio::test]
async fn test_customers_json_skips_duplicate_email() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let service = create_service(&db_path, batch_config(10, dir.path()));
    let content = json!([
        { "name": "Ann Lee", "email": "ann@example.com", "phone": "555-0101" },
        { "name": "Bob Stone", "email": "bob@example.com", "phone": "555-0102" },
        { "name": "Ann L.", "email": "ANN@example.com", "phone": "555-0103" },
    ])
    .to_string();
    let source = write_source(&dir, "customers.json", content.as_bytes());

    let job = service
        .import(ImportRequest::new("crm", ImportType::Customers, source))
        .await
        .unwrap();

    assert_eq!(job.status, ImportStatus::Completed);
    assert_eq!(job.counters.processed, 3);
    assert_eq!(job.counters.successful, 2);
    assert_eq!(job.counters.skipped, 1);
}

#[tokio::test]
async fn test_unknown_mapping_id_fails_job() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let service = create_service(&db_path, batch_config(10, dir.path()));
    let source = write_source(&dir, "menu.csv", menu_csv(3).as_bytes());
    let mut request = ImportRequest::new("menu", ImportType::Menu, source);
    request.mapping_id = Some(Uuid::new_v4());

    let job = service.import(request).await.unwrap();
    assert_eq!(job.status, ImportStatus::Failed);
    assert_eq!(job.error_detail.as_ref().unwrap().reason, FailureReason::Internal);
    assert_eq!(job.counters.successful, 0);
}

#[tokio::test]
async fn test_repeat_upload_rejected_when_configured() {
    let (_db, db_path) = create_test_db().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut config = batch_config(10, dir.path());
    config.reject_duplicate_uploads = true;
    let service = create_service(&db_path, config);
    let source = write_source(&dir, "menu.csv", menu_csv(3).as_bytes());

    let first = service
        .import(ImportRequest::new("menu", ImportType::Menu, source.clone()))
        .await
        .unwrap();
    assert_eq!(first.status, ImportStatus::Completed);

    let second = service
        .import(ImportRequest::new("menu again", ImportType::Menu, source))
        .await;
    match second {
        Err(ImportError::DuplicateUpload { job_id }) => assert_eq!(job_id, first.job_id.to_string()),
        other => panic!("expected DuplicateUpload, got {:?}", other.map(|j| j.status)),
    }
    assert_eq!(service.recent_jobs(10).await.unwrap().len(), 1);
}
