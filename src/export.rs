//! Asynchronous CSV export of the employee table.
//!
//! An export is dispatched as a pending `export_run` row and executed
//! on a spawned task. Row-level failures are tallied and never abort
//! the batch; only a failure of the job itself (file system, database)
//! marks the run failed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;

use crate::errors::AppError;
use crate::query::{self, status_label, EmployeeQuery, EmployeeRow};
use crate::storage::{self, ExportRun};

/// Rows fetched per batch page while streaming to the CSV writer.
const EXPORT_PAGE_SIZE: u64 = 100;

const HEADER: [&str; 11] = [
    "full_name",
    "country.name",
    "state.name",
    "city.name",
    "address",
    "date_hired",
    "image",
    "status",
    "departments_count",
    "created_at",
    "updated_at",
];

#[derive(Debug, Clone)]
pub struct ExportResult {
    pub successful_rows: i64,
    pub failed_rows: i64,
    pub file: PathBuf,
}

pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("employee_export_{}.csv", now.format("%Y-%m-%d_%H-%M-%S"))
}

fn pluralize(n: i64) -> &'static str {
    if n == 1 {
        "row"
    } else {
        "rows"
    }
}

pub fn completed_notification(successful_rows: i64, failed_rows: i64) -> String {
    let mut body = format!("{} {} exported.", successful_rows, pluralize(successful_rows));
    if failed_rows > 0 {
        body.push_str(&format!(
            " {} {} failed to export.",
            failed_rows,
            pluralize(failed_rows)
        ));
    }
    body
}

pub fn failed_notification(failed_rows: i64) -> String {
    format!("Export failed with {} {}.", failed_rows, pluralize(failed_rows))
}

/// Human-readable summary for a finished run; pending runs have none.
pub fn run_notification(run: &ExportRun) -> Option<String> {
    match run.status.as_str() {
        "completed" => Some(completed_notification(
            run.successful_rows.unwrap_or(0),
            run.failed_rows.unwrap_or(0),
        )),
        "failed" => Some(failed_notification(run.failed_rows.unwrap_or(0))),
        _ => None,
    }
}

/// Record a pending run and spawn the batch. Returns immediately; the
/// caller polls the run for completion.
pub async fn dispatch(
    db: &DatabaseConnection,
    dir: &Path,
    criteria: EmployeeQuery,
) -> Result<ExportRun, AppError> {
    let file_name = export_file_name(Utc::now());
    let run = storage::start_export_run(db, &file_name).await?;

    let db = db.clone();
    let dir = dir.to_path_buf();
    let run_id = run.id;
    tokio::spawn(async move {
        run_export(db, dir, run_id, file_name, criteria).await;
    });

    Ok(run)
}

async fn run_export(
    db: DatabaseConnection,
    dir: PathBuf,
    run_id: i64,
    file_name: String,
    criteria: EmployeeQuery,
) {
    match write_export(&db, &dir, &file_name, &criteria).await {
        Ok(result) => {
            if let Err(err) =
                storage::complete_export_run(&db, run_id, result.successful_rows, result.failed_rows)
                    .await
            {
                tracing::error!(run_id, error = %err, "Failed to record export completion");
                return;
            }
            tracing::info!(
                run_id,
                file = %result.file.display(),
                "{}",
                completed_notification(result.successful_rows, result.failed_rows)
            );
        }
        Err(err) => {
            let failed_rows = query::list_employees(&db, &criteria)
                .await
                .map(|page| page.total_items as i64)
                .unwrap_or(0);
            let message = failed_notification(failed_rows);
            if let Err(record_err) =
                storage::fail_export_run(&db, run_id, failed_rows, &message).await
            {
                tracing::error!(run_id, error = %record_err, "Failed to record export failure");
            }
            tracing::error!(run_id, error = %err, "{}", message);
        }
    }
}

/// Page through the query result and stream rows to the CSV file.
async fn write_export(
    db: &DatabaseConnection,
    dir: &Path,
    file_name: &str,
    criteria: &EmployeeQuery,
) -> Result<ExportResult, AppError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(HEADER)?;

    let mut successful_rows = 0i64;
    let mut failed_rows = 0i64;
    let mut page = 1u64;

    loop {
        let mut batch_query = criteria.clone();
        batch_query.page = Some(page);
        batch_query.per_page = Some(EXPORT_PAGE_SIZE);

        let batch = query::list_employees(db, &batch_query).await?;
        for row in &batch.rows {
            match export_record(row) {
                Ok(record) => {
                    writer.write_record(record)?;
                    successful_rows += 1;
                }
                Err(err) => {
                    failed_rows += 1;
                    tracing::warn!(employee_id = row.id, error = %err, "Skipped export row");
                }
            }
        }

        if page >= batch.total_pages || batch.rows.is_empty() {
            break;
        }
        page += 1;
    }

    writer.flush()?;
    Ok(ExportResult {
        successful_rows,
        failed_rows,
        file: path,
    })
}

fn format_timestamp(epoch_seconds: i64) -> String {
    DateTime::<Utc>::from_timestamp(epoch_seconds, 0)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// One CSV record per employee. A row without a display name cannot be
/// exported and fails in isolation.
fn export_record(row: &EmployeeRow) -> Result<Vec<String>, AppError> {
    let full_name = row.full_name();
    if full_name.trim().is_empty() {
        return Err(AppError::Other(format!(
            "employee {} has no display name",
            row.id
        )));
    }

    Ok(vec![
        full_name,
        row.country_name.clone().unwrap_or_default(),
        row.state_name.clone().unwrap_or_default(),
        row.city_name.clone().unwrap_or_default(),
        row.address.clone(),
        row.date_hired.clone(),
        row.image.clone().unwrap_or_default(),
        status_label(row.is_active()).to_string(),
        row.departments_count.to_string(),
        format_timestamp(row.created_at),
        format_timestamp(row.updated_at),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities;
    use crate::storage::test_support::TestDb;
    use crate::storage::{DepartmentInput, EmployeeInput};
    use chrono::TimeZone;
    use sea_orm::{ActiveModelTrait, Set};
    use tempfile::TempDir;

    #[test]
    fn test_export_file_name_format() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(export_file_name(at), "employee_export_2026-01-02_03-04-05.csv");
    }

    #[test]
    fn test_completed_notification_wording() {
        assert_eq!(completed_notification(8, 2), "8 rows exported. 2 rows failed to export.");
        assert_eq!(completed_notification(1, 0), "1 row exported.");
        assert_eq!(completed_notification(0, 1), "0 rows exported. 1 row failed to export.");
    }

    #[test]
    fn test_failed_notification_wording() {
        assert_eq!(failed_notification(10), "Export failed with 10 rows.");
        assert_eq!(failed_notification(1), "Export failed with 1 row.");
    }

    async fn seed_geo(db: &sea_orm::DatabaseConnection) -> (i64, i64, i64) {
        let country = storage::create_country(db, "Jordan", "JO", "962")
            .await
            .expect("Failed to create country");
        let state = storage::create_state(db, "Amman", country.id)
            .await
            .expect("Failed to create state");
        let city = storage::create_city(db, "Abdali", state.id)
            .await
            .expect("Failed to create city");
        (country.id, state.id, city.id)
    }

    async fn seed_employee(db: &sea_orm::DatabaseConnection, i: usize, geo: (i64, i64, i64)) {
        let dept = storage::create_department(
            db,
            DepartmentInput {
                name: Some(format!("Dept {i}")),
            },
        )
        .await
        .expect("Failed to create department");

        storage::create_employee(
            db,
            EmployeeInput {
                first_name: Some(format!("Emp{i}")),
                last_name: Some("Person".to_string()),
                address: Some("1 Main St".to_string()),
                date_hired: Some("2024-01-15".to_string()),
                image: None,
                status: true,
                country_id: Some(geo.0),
                state_id: Some(geo.1),
                city_id: Some(geo.2),
                departments: Some(vec![dept.id]),
            },
        )
        .await
        .expect("Failed to create employee");
    }

    /// Insert a record with an empty display name, bypassing the form
    /// validation that would normally reject it.
    async fn seed_blank_name_employee(db: &sea_orm::DatabaseConnection, geo: (i64, i64, i64)) {
        entities::employee::ActiveModel {
            first_name: Set(String::new()),
            last_name: Set(String::new()),
            address: Set("1 Main St".to_string()),
            date_hired: Set("2024-01-15".to_string()),
            image: Set(None),
            status: Set(1),
            country_id: Set(geo.0),
            state_id: Set(geo.1),
            city_id: Set(geo.2),
            created_at: Set(0),
            updated_at: Set(0),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to insert employee");
    }

    #[tokio::test]
    async fn test_export_accounts_partial_failures() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let geo = seed_geo(db).await;

        for i in 0..8 {
            seed_employee(db, i, geo).await;
        }
        seed_blank_name_employee(db, geo).await;
        seed_blank_name_employee(db, geo).await;

        let dir = TempDir::new().expect("Failed to create temp dir");
        let result = write_export(db, dir.path(), "out.csv", &EmployeeQuery::default())
            .await
            .expect("Export failed");

        assert_eq!(result.successful_rows, 8);
        assert_eq!(result.failed_rows, 2);
        assert_eq!(
            completed_notification(result.successful_rows, result.failed_rows),
            "8 rows exported. 2 rows failed to export."
        );

        let contents = std::fs::read_to_string(&result.file).expect("Failed to read export");
        let lines: Vec<&str> = contents.lines().collect();
        // Header plus the eight exported rows
        assert_eq!(lines.len(), 9);
        assert_eq!(lines[0], HEADER.join(","));
        assert!(lines.iter().skip(1).all(|l| l.contains("Active")));
    }

    #[tokio::test]
    async fn test_export_total_failure_is_io_error() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let dir = TempDir::new().expect("Failed to create temp dir");
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").expect("Failed to write file");

        // The target directory path is occupied by a regular file
        let err = write_export(db, &blocker, "out.csv", &EmployeeQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }

    #[tokio::test]
    async fn test_dispatch_completes_run() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();
        let geo = seed_geo(db).await;
        seed_employee(db, 0, geo).await;

        let dir = TempDir::new().expect("Failed to create temp dir");
        let run = dispatch(db, dir.path(), EmployeeQuery::default())
            .await
            .expect("Dispatch failed");
        assert_eq!(run.status, "pending");

        let mut finished = None;
        for _ in 0..100 {
            let current = storage::get_export_run(db, run.id)
                .await
                .expect("Query failed")
                .expect("Run missing");
            if current.status != "pending" {
                finished = Some(current);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let finished = finished.expect("Export did not finish");
        assert_eq!(finished.status, "completed");
        assert_eq!(finished.successful_rows, Some(1));
        assert_eq!(finished.failed_rows, Some(0));
        assert_eq!(run_notification(&finished).as_deref(), Some("1 row exported."));
        assert!(dir.path().join(&finished.file_name).exists());
    }
}
