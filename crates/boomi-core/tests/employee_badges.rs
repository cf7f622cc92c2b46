mod common;

use anyhow::Result;
use boomi_core::context::SoftErrorKind;
use boomi_core::jobs::employee_badges::{self, BADGE_LIST, USERS_FILE};
use boomi_core::run_job;
use boomi_core::sink::{MemorySink, MemoryTable};
use boomi_core::source::MemorySource;
use boomi_parser::Row;

use common::{dump, options, run, sqlite_context};

const SCHEMA: &str = "CREATE TABLE f_employee_etl (
    employee_id TEXT,
    first_name TEXT,
    last_name TEXT,
    badgeid TEXT PRIMARY KEY,
    email TEXT
)";

fn badge_line(id: &str, last: &str, first: &str, disabled: &str) -> String {
    format!("{id}||{last}||{first}||2016-01-01||{disabled}||2030-01-01||||||")
}

fn users_csv(rows: &[[&str; 7]]) -> String {
    let mut text = String::from(
        "employee_id,Last_Name,First_Name,Preffered_Last_Name,Preferred_First_Name,Email,Employee_Status\n",
    );
    for row in rows {
        text.push_str(&row.join(","));
        text.push('\n');
    }
    text
}

fn write(root: &std::path::Path, relative: &str, text: &str) -> Result<()> {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().expect("parent"))?;
    std::fs::write(path, text)?;
    Ok(())
}

#[test]
fn preferred_names_expand_into_one_row_per_badge() -> Result<()> {
    run(async {
        let dir = tempfile::tempdir()?;
        let badges = [
            badge_line("100", "Smith", "Robert", "False"),
            badge_line("300", "Jones", "Ann", "True"),
            badge_line("200", "SMITH", "Bob", "False"),
        ];
        write(dir.path(), BADGE_LIST, &badges.join("\n"))?;
        write(
            dir.path(),
            USERS_FILE,
            &users_csv(&[
                ["E1", "smith", "robert", "", "Bob", "rs@example.com", "Active"],
                ["E2", "Jones", "Ann", "", "", "aj@example.com", "Active"],
                ["E3", "Gone", "Guy", "", "", "gg@example.com", "Terminated"],
            ]),
        )?;
        let (ctx, pools) = sqlite_context(options(dir.path(), &["mysql"]), &[SCHEMA]).await?;

        let report = run_job(&employee_badges::EmployeeBadges, &ctx).await?;

        assert!(report.succeeded());
        // The badge table carries no environment suffix.
        let sinks: Vec<&str> = report.sinks().map(|stats| stats.sink.as_str()).collect();
        assert_eq!(sinks, vec!["mysql:f_employee_etl"]);
        assert_eq!(
            dump(
                &pools[0],
                "SELECT employee_id, first_name, last_name, badgeid, email \
                 FROM f_employee_etl ORDER BY badgeid"
            )
            .await?,
            vec![
                "E1|Robert|Smith|100|rs@example.com",
                "E1|Robert|Smith|200|rs@example.com",
            ]
        );
        let cache = report.phase("cache:badge_ids").expect("cache phase");
        assert_eq!(cache.rows_read, 3);
        assert_eq!(cache.cache_entries, Some(2));

        // Ann's only badge is disabled.
        let errors = ctx.errors.snapshot();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, SoftErrorKind::Lookup);
        assert_eq!(errors[0].identity.as_deref(), Some("E2"));
        Ok(())
    })
}

#[test]
fn cache_is_complete_before_the_first_employee_is_read() -> Result<()> {
    run(async {
        let dir = tempfile::tempdir()?;
        let (ctx, _pools) = sqlite_context(options(dir.path(), &["mysql"]), &[SCHEMA]).await?;
        let mut badges: Vec<Row> = (0..500)
            .map(|n| {
                Row::new()
                    .with("badge_id", format!("{n}"))
                    .with("last_name", format!("Filler{n}"))
                    .with("first_name", "X")
                    .with("disabled", "False")
            })
            .collect();
        badges.push(
            Row::new()
                .with("badge_id", "9999")
                .with("last_name", "Late")
                .with("first_name", "Lou")
                .with("disabled", "False"),
        );
        let users = vec![Row::new()
            .with("employee_id", "E9")
            .with("Last_Name", "Late")
            .with("First_Name", "Lou")
            .with("Preffered_Last_Name", "")
            .with("Preferred_First_Name", "")
            .with("Email", "lou@example.com")
            .with("Employee_Status", "Active")];
        let table = MemoryTable::default();

        let report = employee_badges::run_with(
            &ctx,
            Box::new(MemorySource::new("badges", badges)),
            Box::new(MemorySource::new("users", users)),
            vec![Box::new(MemorySink::new(
                "memory",
                table.clone(),
                &employee_badges::DISCRIMINANT,
            ))],
        )
        .await?;

        assert_eq!(report.phases[0].phase, "cache:badge_ids");
        assert_eq!(table.rows().len(), 1);
        assert_eq!(table.rows()[0].text("badgeid"), "9999");
        Ok(())
    })
}
