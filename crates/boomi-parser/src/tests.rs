use std::fs;
use std::path::PathBuf;

use crate::errors::ParserError;
use crate::formats::{
    decode_latin1, read_delimited, read_json_records, split_lines, DelimitedFormat,
};
use crate::model::Value;

fn fixture(path: &str) -> Vec<u8> {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let full_path = base.join("tests/data").join(path);
    fs::read(&full_path)
        .unwrap_or_else(|err| panic!("failed to read fixture {}: {}", full_path.display(), err))
}

const JOURNAL_FIELDS: [&str; 7] = [
    "card_id_field",
    "blank1",
    "timestamp",
    "blank2",
    "name",
    "card_id",
    "location",
];

#[test]
fn reads_pipe_journal_with_fixed_fields() {
    let format = DelimitedFormat::fixed(b'|', &JOURNAL_FIELDS);
    let rows: Vec<_> = read_delimited(fixture("journal.txt"), &format)
        .expect("open journal")
        .collect::<Result<_, _>>()
        .expect("journal rows");

    assert_eq!(rows.len(), 4);
    let first = &rows[0];
    assert_eq!(first.fields().collect::<Vec<_>>(), JOURNAL_FIELDS.to_vec());
    assert_eq!(first.text("timestamp"), "9/1/2016 12:00:05 AM");
    assert_eq!(first.text("name"), "Doe, Jane");
    assert_eq!(first.text("card_id"), "");
    assert_eq!(first.text("location"), "Loc");
}

#[test]
fn short_fixed_rows_are_padded_with_null() {
    let format = DelimitedFormat::fixed(b'|', &["a", "b", "c"]);
    let rows: Vec<_> = read_delimited(b"1|2\n".to_vec(), &format)
        .expect("open")
        .collect::<Result<_, _>>()
        .expect("rows");
    assert_eq!(rows[0].get("c"), Some(&Value::Null));
}

#[test]
fn header_csv_strips_bom() {
    let rows = read_delimited(fixture("workday_desks.csv"), &DelimitedFormat::csv()).expect("open");
    assert_eq!(rows.fields()[0], "Employee_ID");
    let rows: Vec<_> = rows.collect::<Result<_, _>>().expect("rows");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].text("Worker_Type"), "Contingent Worker");
}

#[test]
fn billing_preamble_is_skipped_and_headers_normalized() {
    let format = DelimitedFormat::csv()
        .with_skip_rows(1)
        .with_normalized_headers();
    let rows = read_delimited(fixture("billing.csv"), &format).expect("open billing");
    assert!(rows.fields().iter().any(|field| field == "linkedaccountid"));
    assert!(rows.fields().iter().any(|field| field == "user_name"));

    let rows: Vec<_> = rows.collect::<Result<_, _>>().expect("billing rows");
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0].text("totalcost"), "12.5");
}

#[test]
fn strict_format_flags_ragged_records_only() {
    let format = DelimitedFormat::csv().strict();
    let rows: Vec<_> = read_delimited(b"a,b\n1,2\n3\n4,5\n".to_vec(), &format)
        .expect("open")
        .collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].as_ref().expect("first row").text("b"), "2");
    assert!(matches!(
        rows[1],
        Err(ParserError::FieldCount { line: 3, expected: 2, found: 1 })
    ));
    assert_eq!(rows[2].as_ref().expect("last row").text("a"), "4");
}

#[test]
fn empty_header_input_is_an_error() {
    let err = read_delimited(Vec::new(), &DelimitedFormat::csv()).unwrap_err();
    assert!(matches!(err, ParserError::EmptyInput { .. }));
}

#[test]
fn json_records_become_rows() {
    let rows = read_json_records(&fixture("servicenow_accounts.json"), "records").expect("records");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].text("u_account_name"), "prod");
    assert_eq!(rows[0].text("u_account_number"), " 123456789012 ");
}

#[test]
fn json_without_records_key_is_rejected() {
    let err = read_json_records(br#"{"result": []}"#, "records").unwrap_err();
    assert!(matches!(err, ParserError::MissingRecordsKey { .. }));

    let err = read_json_records(br#"{"records": [1]}"#, "records").unwrap_err();
    assert!(matches!(err, ParserError::RecordShape { index: 0, .. }));
}

#[test]
fn latin1_export_splits_on_crlf() {
    let text = decode_latin1(&fixture("HrExport.txt"));
    let lines = split_lines(&text, "\r\n");
    assert_eq!(lines.len(), 5);
    assert!(lines[4].contains("München"));
    assert_eq!(lines[0].split('\t').count(), 5);
}
