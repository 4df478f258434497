use chrono::{Datelike, NaiveDate, Timelike};
use meter_readings::{
    find_account_by_external_id, get_readings_for_account, insert_account, process_batch,
    setup_database, verify_count, BatchFailure, BatchOptions, BatchOutcome, NewMeterReading,
    Ledger, Rejection,
};
use rusqlite::Connection;

/// Accounts 2344, 2233, 8766 (internal ids 1, 2, 3).
/// 2344 already has a reading at 22/04/2019 12:25.
fn seeded_ledger() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();

    let tommy = insert_account(&conn, 2344, "Tommy", "Test").unwrap();
    insert_account(&conn, 2233, "Barry", "Test").unwrap();
    insert_account(&conn, 8766, "Sally", "Test").unwrap();

    let existing = NewMeterReading {
        account_ref: tommy,
        reading_time: NaiveDate::from_ymd_opt(2019, 4, 22)
            .unwrap()
            .and_hms_opt(12, 25, 0)
            .unwrap(),
        reading_value: 1002,
    };
    conn.bulk_insert(&[existing]).unwrap();

    conn
}

fn upload(conn: &Connection, csv: &str) -> BatchOutcome {
    process_batch(conn, csv.as_bytes(), BatchOptions::default())
}

#[test]
fn test_valid_reading_is_stored() {
    let conn = seeded_ledger();
    let outcome = upload(
        &conn,
        "\
AccountId,MeterReadingDateTime,MeterReadValue
2233,22/04/2019 12:25,45522",
    );

    assert_eq!(outcome.successful_readings, 1);
    assert_eq!(outcome.failed_readings, 0);

    let barry = find_account_by_external_id(&conn, 2233).unwrap().unwrap();
    let readings = get_readings_for_account(&conn, barry.id).unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].reading_value, 45522);
    assert_eq!(readings[0].account_ref, 2);
}

#[test]
fn test_unknown_account_fails_reading() {
    let conn = seeded_ledger();
    let outcome = upload(
        &conn,
        "\
AccountId,MeterReadingDateTime,MeterReadValue
9999,22/04/2019 12:25,45522",
    );

    assert_eq!(outcome.successful_readings, 0);
    assert_eq!(outcome.failed_readings, 1);
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].contains("does not exist"));
}

#[test]
fn test_reading_too_large_fails() {
    let conn = seeded_ledger();
    let outcome = upload(
        &conn,
        "\
AccountId,MeterReadingDateTime,MeterReadValue
2233,22/04/2019 12:25,123456",
    );

    assert_eq!(outcome.successful_readings, 0);
    assert_eq!(outcome.failed_readings, 1);
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].contains("NNNNN format"));
}

#[test]
fn test_flexible_date_format_is_day_first() {
    let conn = seeded_ledger();
    let outcome = upload(
        &conn,
        "\
AccountId,MeterReadingDateTime,MeterReadValue
8766,6/5/2019 9:24,12345",
    );

    assert_eq!(outcome.successful_readings, 1);
    assert_eq!(outcome.failed_readings, 0);

    let sally = find_account_by_external_id(&conn, 8766).unwrap().unwrap();
    let reading = &get_readings_for_account(&conn, sally.id).unwrap()[0];
    assert_eq!(reading.reading_value, 12345);
    assert_eq!(reading.reading_time.day(), 6);
    assert_eq!(reading.reading_time.month(), 5);
    assert_eq!(reading.reading_time.year(), 2019);
    assert_eq!(reading.reading_time.hour(), 9);
    assert_eq!(reading.reading_time.minute(), 24);
}

#[test]
fn test_multiple_readings_processed() {
    let conn = seeded_ledger();
    let outcome = upload(
        &conn,
        "\
AccountId,MeterReadingDateTime,MeterReadValue
2233,22/04/2019 12:25,45522
8766,6/5/2019 9:24,12345
9999,22/04/2019 12:25,45522",
    );

    assert_eq!(outcome.successful_readings, 2);
    assert_eq!(outcome.failed_readings, 1);
    assert_eq!(outcome.errors.len(), 1);
}

#[test]
fn test_unrecognised_date_fails() {
    let conn = seeded_ledger();
    let outcome = upload(
        &conn,
        "\
AccountId,MeterReadingDateTime,MeterReadValue
2233,April 22nd 2019,45522
2233,2019-04-22T12:25:00,45522",
    );

    assert_eq!(outcome.failed_readings, 2);
    assert!(outcome.errors.iter().all(|e| e.contains("Invalid date format")));
}

#[test]
fn test_existing_duplicate_and_older_readings_rejected() {
    let conn = seeded_ledger();
    let outcome = upload(
        &conn,
        "\
AccountId,MeterReadingDateTime,MeterReadValue
2344,22/04/2019 12:25,1002
2344,21/04/2019 12:25,999
2344,23/04/2019 12:25,1010",
    );

    assert_eq!(outcome.successful_readings, 1);
    assert_eq!(outcome.failed_readings, 2);
    assert!(matches!(outcome.rejections[0].reason, Rejection::DuplicateReading { account_id: 2344, .. }));
    assert!(matches!(outcome.rejections[1].reason, Rejection::OutOfOrder { account_id: 2344, .. }));
}

#[test]
fn test_resubmitting_batch_rejects_every_row() {
    let conn = seeded_ledger();
    let csv = "\
AccountId,MeterReadingDateTime,MeterReadValue
2233,22/04/2019 12:25,45522
8766,6/5/2019 9:24,12345";

    let first = upload(&conn, csv);
    assert_eq!(first.successful_readings, 2);
    let stored = verify_count(&conn).unwrap();

    let second = upload(&conn, csv);
    assert_eq!(second.successful_readings, 0);
    assert_eq!(second.failed_readings, 2);
    assert!(second.errors.iter().all(|e| e.starts_with("Duplicate reading")));
    assert_eq!(verify_count(&conn).unwrap(), stored);
}

#[test]
fn test_in_batch_inversion_only_caught_at_storage() {
    let conn = seeded_ledger();
    let outcome = upload(
        &conn,
        "\
AccountId,MeterReadingDateTime,MeterReadValue
2233,23/04/2019 12:25,200
2233,22/04/2019 12:25,100
2233,23/04/2019 12:25,300",
    );

    // No row is rejected on its own; the sibling collision fails the flush
    assert_eq!(outcome.failed_readings, 0);
    assert_eq!(outcome.successful_readings, 3);
    assert!(matches!(outcome.failure, Some(BatchFailure::Persist(_))));
    assert_eq!(verify_count(&conn).unwrap(), 1);
}

#[test]
fn test_in_batch_inversion_rejected_with_guard() {
    let conn = seeded_ledger();
    let csv = "\
AccountId,MeterReadingDateTime,MeterReadValue
2233,23/04/2019 12:25,200
2233,22/04/2019 12:25,100";

    let outcome = process_batch(&conn, csv.as_bytes(), BatchOptions { reject_in_batch_duplicates: true });

    assert_eq!(outcome.successful_readings, 1);
    assert_eq!(outcome.failed_readings, 1);
    assert!(outcome.errors[0].contains("is older than existing reading"));
    assert!(outcome.failure.is_none());
    assert_eq!(verify_count(&conn).unwrap(), 2);
}

#[test]
fn test_second_connection_sees_flushed_readings() {
    let path = std::env::temp_dir().join(format!("meter_shared_{}.db", std::process::id()));
    std::fs::remove_file(&path).ok();
    let first = Connection::open(&path).unwrap();
    setup_database(&first).unwrap();
    insert_account(&first, 2233, "Barry", "Test").unwrap();
    let second = Connection::open(&path).unwrap();

    let csv = "\
AccountId,MeterReadingDateTime,MeterReadValue
2233,22/04/2019 12:25,45522";

    // Two uploads of the same file through separate connections
    let winner = upload(&first, csv);
    let loser = upload(&second, csv);

    assert_eq!(winner.successful_readings, 1);
    assert_eq!(loser.failed_readings, 1);
    assert!(loser.errors[0].starts_with("Duplicate reading for account 2233"));
    assert_eq!(verify_count(&first).unwrap(), 1);

    drop(first);
    drop(second);
    for suffix in ["", "-wal", "-shm"] {
        std::fs::remove_file(format!("{}{}", path.display(), suffix)).ok();
    }
}
