mod common;

use anyhow::Result;
use boomi_core::files::FileStore;
use boomi_core::jobs::desk_audit::{self, CONTINGENT_MISMATCHES, EMPLOYEE_MISMATCHES, EXPORT_FIELDS};
use boomi_core::sink::FileSink;
use boomi_core::source::{FileFormat, FileSource};
use boomi_core::JobContext;
use boomi_parser::DelimitedFormat;

use common::{fixture, options, run};

const HEADER: &str =
    "EmployeeID\tOfficeLocation\tWorkLocation_CS\tWorkLocation_WD\tSeatID\twd_desk_id\twd_employee_type";

#[test]
fn mismatches_are_split_by_worker_type() -> Result<()> {
    run(async {
        let dir = tempfile::tempdir()?;
        let ctx = JobContext::new(options(dir.path(), &["mysql"]))?;
        let fixtures = FileStore::new("fixtures", fixture(""));
        let out = FileStore::new("out", dir.path());

        let desks =
            FileSource::delimited(fixtures.clone(), "workday_desks.csv", DelimitedFormat::csv())
                .requiring(&["Employee_ID", "WPR_Desk_Number", "Worker_Type"]);
        let export = FileSource::new(
            fixtures,
            "HrExport.txt",
            FileFormat::latin1_lines("\r\n", '\t', &EXPORT_FIELDS),
        );
        let report = desk_audit::run_with(
            &ctx,
            Box::new(desks),
            Box::new(export),
            Box::new(FileSink::new(out.clone(), EMPLOYEE_MISMATCHES).with_header()),
            Box::new(FileSink::new(out, CONTINGENT_MISMATCHES).with_header()),
        )
        .await?;

        assert!(report.succeeded());
        let main = report.phase("desk_audit").expect("main phase");
        assert_eq!(main.rows_read, 5);
        assert_eq!(main.rows_emitted, 4);

        let employees = std::fs::read_to_string(dir.path().join(EMPLOYEE_MISMATCHES))?;
        assert_eq!(
            employees,
            format!("{HEADER}\n1003\tParis\tParis\tParis\tPAR5\t\tEmployee\n")
        );
        let contingent = std::fs::read_to_string(dir.path().join(CONTINGENT_MISMATCHES))?;
        assert_eq!(
            contingent,
            format!("{HEADER}\n1002\tPortland\tPortland\tPortland\tPDX-9\tPDX-7\tContingent Worker\n")
        );

        let odd: Vec<(String, String)> = report
            .anomalies
            .iter()
            .map(|row| (row.text("EmployeeID"), row.text("SeatID")))
            .collect();
        assert_eq!(
            odd,
            vec![
                ("1004".to_string(), "R1".to_string()),
                ("1005".to_string(), "BER44".to_string()),
            ]
        );
        assert_eq!(report.anomalies[1].text("OfficeLocation"), "München");
        Ok(())
    })
}
