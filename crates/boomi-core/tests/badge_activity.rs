mod common;

use anyhow::Result;
use boomi_core::jobs::badge_activity::{self, DEFAULT_INPUT};
use boomi_core::{find_job, run_job};

use common::{count, dump, options, run, sqlite_context, stage_fixture};

const SCHEMA: &str = "CREATE TABLE ccure_activity_etl_stage (
    activitydate TEXT NOT NULL,
    badgeid TEXT NOT NULL,
    username TEXT NOT NULL,
    location TEXT
)";

const SELECT_ALL: &str = "SELECT activitydate, badgeid, username, location \
                          FROM ccure_activity_etl_stage ORDER BY username";

#[test]
fn journal_lands_in_the_activity_table() -> Result<()> {
    run(async {
        let dir = tempfile::tempdir()?;
        stage_fixture(dir.path(), "journal.txt", DEFAULT_INPUT)?;
        let (ctx, pools) = sqlite_context(options(dir.path(), &["mysql"]), &[SCHEMA]).await?;

        let job = find_job("badge_activity").expect("registered");
        let report = run_job(job, &ctx).await?;

        assert!(report.succeeded());
        let phase = report.phase("badge_activity").expect("main phase");
        assert_eq!(phase.rows_read, 4);
        assert_eq!(phase.rows_emitted, 2);
        assert_eq!(phase.rows_dropped, 2);
        assert_eq!(report.soft_errors.total, 2);

        assert_eq!(
            dump(&pools[0], SELECT_ALL).await?,
            vec![
                "2016-09-01 00:00:05|50066|Doe, Jane|Loc",
                "2016-09-01 07:15:00|7|Roe, Rick|TPE 4th FL Fire Stair West",
            ]
        );
        Ok(())
    })
}

#[test]
fn second_run_updates_instead_of_duplicating() -> Result<()> {
    run(async {
        let dir = tempfile::tempdir()?;
        stage_fixture(dir.path(), "journal.txt", DEFAULT_INPUT)?;
        let (ctx, pools) = sqlite_context(options(dir.path(), &["mysql"]), &[SCHEMA]).await?;

        let job = find_job("badge_activity").expect("registered");
        let first = run_job(job, &ctx).await?;
        let second = run_job(job, &ctx).await?;

        let inserted = |report: &boomi_core::RunReport| {
            report.sinks().map(|stats| stats.inserted).sum::<usize>()
        };
        assert_eq!(inserted(&first), 2);
        assert_eq!(inserted(&second), 0);
        assert_eq!(second.sinks().map(|stats| stats.updated).sum::<usize>(), 2);
        assert_eq!(count(&pools[0], "ccure_activity_etl_stage").await?, 2);
        Ok(())
    })
}

#[test]
fn constraint_failure_on_one_engine_leaves_the_other_intact() -> Result<()> {
    run(async {
        let dir = tempfile::tempdir()?;
        stage_fixture(dir.path(), "journal.txt", DEFAULT_INPUT)?;
        let (ctx, pools) =
            sqlite_context(options(dir.path(), &["mysql", "redshift"]), &[SCHEMA]).await?;
        // Only the second engine refuses short badge numbers.
        sqlx::query("DROP TABLE ccure_activity_etl_stage")
            .execute(&pools[1])
            .await?;
        sqlx::query(
            "CREATE TABLE ccure_activity_etl_stage (
                activitydate TEXT NOT NULL,
                badgeid TEXT NOT NULL CHECK (length(badgeid) > 3),
                username TEXT NOT NULL,
                location TEXT
            )",
        )
        .execute(&pools[1])
        .await?;

        let report = run_job(find_job("badge_activity").expect("registered"), &ctx).await?;

        assert!(report.succeeded());
        assert_eq!(count(&pools[0], "ccure_activity_etl_stage").await?, 2);
        assert_eq!(
            dump(&pools[1], SELECT_ALL).await?,
            vec!["2016-09-01 00:00:05|50066|Doe, Jane|Loc"]
        );
        let strict = report
            .sinks()
            .find(|stats| stats.sink.starts_with("redshift:"))
            .expect("redshift sink");
        assert_eq!(strict.rejected, 1);
        assert_eq!(strict.inserted, 1);
        assert_eq!(report.soft_errors.total, 3);
        Ok(())
    })
}

#[test]
fn limit_caps_rows_read() -> Result<()> {
    run(async {
        let dir = tempfile::tempdir()?;
        stage_fixture(dir.path(), "journal.txt", DEFAULT_INPUT)?;
        let mut options = options(dir.path(), &["mysql"]);
        options.limit = Some(1);
        let (ctx, pools) = sqlite_context(options, &[SCHEMA]).await?;

        let report = run_job(&badge_activity::BadgeActivity, &ctx).await?;

        assert_eq!(report.phase("badge_activity").expect("main phase").rows_read, 1);
        assert_eq!(count(&pools[0], "ccure_activity_etl_stage").await?, 1);
        Ok(())
    })
}

#[test]
fn missing_journal_is_a_hard_error() -> Result<()> {
    run(async {
        let dir = tempfile::tempdir()?;
        let (ctx, pools) = sqlite_context(options(dir.path(), &["mysql"]), &[SCHEMA]).await?;

        let result = run_job(&badge_activity::BadgeActivity, &ctx).await;

        assert!(result.is_err());
        assert_eq!(count(&pools[0], "ccure_activity_etl_stage").await?, 0);
        Ok(())
    })
}

#[test]
fn missing_table_fails_the_sink_instead_of_rejecting_rows() -> Result<()> {
    run(async {
        let dir = tempfile::tempdir()?;
        stage_fixture(dir.path(), "journal.txt", DEFAULT_INPUT)?;
        let (ctx, pools) =
            sqlite_context(options(dir.path(), &["mysql", "redshift"]), &[SCHEMA]).await?;
        sqlx::query("DROP TABLE ccure_activity_etl_stage")
            .execute(&pools[1])
            .await?;

        let report = run_job(&badge_activity::BadgeActivity, &ctx).await?;

        assert!(!report.succeeded());
        let failed = report.failed_sinks();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].sink.starts_with("redshift:"));
        assert!(failed[0]
            .error
            .as_deref()
            .is_some_and(|error| error.contains("no such table")));
        assert_eq!(failed[0].rejected, 0);
        // Only the two unparsable journal lines; no per-row sink errors.
        assert_eq!(report.soft_errors.total, 2);
        assert_eq!(count(&pools[0], "ccure_activity_etl_stage").await?, 2);
        Ok(())
    })
}
