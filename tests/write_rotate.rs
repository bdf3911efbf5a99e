use chrono::NaiveDate;
use csv_codec::{CsvError, Value, Writer};
use std::fs;
use std::io::{self, Write as IoWrite};
use std::sync::{Arc, Mutex};

fn row(i: i64) -> Vec<Value> {
    vec![Value::from(i), Value::from(format!("name{i}"))]
}

#[test]
fn rotation_splits_rows_across_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file_ends = Arc::new(Mutex::new(Vec::new()));

    let mut writer = Writer::to_dir(dir.path())
        .file_prefix("batch")
        .single_file_limit(5)
        .columns(["ID", "Name"])?
        .on_file_end({
            let ends = Arc::clone(&file_ends);
            move |ev| {
                ends.lock()
                    .unwrap()
                    .push((ev.file_num, ev.file_row_num, ev.source_row_num));
            }
        });
    for i in 1..=12 {
        writer.write_row(&row(i))?;
    }
    writer.close()?;

    for (file_num, expected_rows) in [(1, 5), (2, 5), (3, 2)] {
        let path = dir.path().join(format!("batch-{file_num}.csv"));
        let text = fs::read_to_string(&path)?;
        let lines: Vec<&str> = text.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines[0], "ID,Name", "header missing in {path:?}");
        assert_eq!(lines.len() - 1, expected_rows, "row count in {path:?}");
    }
    assert!(!dir.path().join("batch-4.csv").exists());

    assert_eq!(
        *file_ends.lock().unwrap(),
        vec![(1, 5, 5), (2, 5, 10), (3, 2, 12)]
    );
    Ok(())
}

#[test]
fn write_line_events_count_per_file_and_per_session() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let lines = Arc::new(Mutex::new(Vec::new()));

    let mut writer = Writer::to_dir(dir.path())
        .file_prefix("ev")
        .single_file_limit(2)
        .columns(["ID", "Name"])?
        .on_write_line({
            let lines = Arc::clone(&lines);
            move |ev| {
                lines
                    .lock()
                    .unwrap()
                    .push((ev.file_num, ev.file_row_num, ev.source_row_num));
            }
        });
    for i in 1..=5 {
        writer.write_row(&row(i))?;
    }
    writer.close()?;

    assert_eq!(
        *lines.lock().unwrap(),
        vec![(1, 1, 1), (1, 2, 2), (2, 1, 3), (2, 2, 4), (3, 1, 5)]
    );
    Ok(())
}

#[test]
fn type_formatting_rules() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dt = NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_milli_opt(10, 30, 0, 123)
        .unwrap();

    let mut writer = Writer::to_dir(dir.path())
        .file_prefix("types")
        .columns(["s", "n", "f", "d", "empty"])?;
    writer.write_row(&[
        Value::from("a,\"b\""),
        Value::from(42),
        Value::from(2.5),
        Value::from(dt),
        Value::Null,
    ])?;
    writer.close()?;

    let text = fs::read_to_string(dir.path().join("types-1.csv"))?;
    assert_eq!(
        text,
        "s,n,f,d,empty\r\n\"a,\"\"b\"\"\",42,2.5,2024-01-15 10:30:00.123,\r\n"
    );
    Ok(())
}

#[test]
fn numeric_marker_prefixes_numbers() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut writer = Writer::to_dir(dir.path())
        .file_prefix("marked")
        .number_as_text(true)
        .columns(["n", "s"])?;
    writer.write_row(&[Value::from(7), Value::from("x")])?;
    writer.close()?;

    let text = fs::read_to_string(dir.path().join("marked-1.csv"))?;
    assert_eq!(text, "n,s\r\n\t7,x\r\n");
    Ok(())
}

#[test]
fn arity_and_missing_columns_are_fatal() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut writer = Writer::to_dir(dir.path());
    let err = writer.write_row(&[Value::from(1)]).unwrap_err();
    assert!(matches!(err, CsvError::MissingColumnNames));

    let mut writer = Writer::to_dir(dir.path()).columns(["a", "b"])?;
    let err = writer.write_row(&[Value::from(1)]).unwrap_err();
    assert!(matches!(err, CsvError::RowArity { expected: 2, got: 1 }));
    Ok(())
}

#[test]
fn duplicate_requested_columns_are_fatal() {
    let err = Writer::to_dir("unused").columns(["A", "a"]).err();
    assert!(matches!(err, Some(CsvError::DuplicateColumn(_))));
}

#[test]
fn batch_without_handler_closes_the_session() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let disposed = Arc::new(Mutex::new(0u32));

    let mut writer = Writer::to_dir(dir.path())
        .file_prefix("auto")
        .columns(["ID", "Name"])?
        .on_disposed({
            let disposed = Arc::clone(&disposed);
            move || *disposed.lock().unwrap() += 1
        });
    writer.write_batch((1..=3).map(row).collect::<Vec<_>>())?;
    assert_eq!(*disposed.lock().unwrap(), 1);

    // The session is closed; further rows are dropped.
    writer.write_row(&row(4))?;
    writer.close()?;
    assert_eq!(*disposed.lock().unwrap(), 1);

    let text = fs::read_to_string(dir.path().join("auto-1.csv"))?;
    assert_eq!(text.split("\r\n").filter(|l| !l.is_empty()).count(), 4);
    Ok(())
}

#[test]
fn batch_handler_controls_the_close() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let batches = Arc::new(Mutex::new(Vec::new()));

    let mut writer = Writer::to_dir(dir.path())
        .file_prefix("kept")
        .columns(["ID", "Name"])?
        .on_batch_end({
            let batches = Arc::clone(&batches);
            move |ev| {
                batches.lock().unwrap().push(ev.batch_num);
                ev.close = ev.batch_num == 2;
            }
        });
    writer.write_batch((1..=2).map(row).collect::<Vec<_>>())?;
    writer.write_batch((3..=4).map(row).collect::<Vec<_>>())?;
    assert_eq!(*batches.lock().unwrap(), vec![1, 2]);

    writer.write_row(&row(5))?;
    let text = fs::read_to_string(dir.path().join("kept-1.csv"))?;
    assert_eq!(text.split("\r\n").filter(|l| !l.is_empty()).count(), 5);
    Ok(())
}

#[test]
fn close_is_idempotent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let disposed = Arc::new(Mutex::new(0u32));
    let file_ends = Arc::new(Mutex::new(0u32));

    let mut writer = Writer::to_dir(dir.path())
        .file_prefix("once")
        .columns(["ID", "Name"])?
        .on_disposed({
            let disposed = Arc::clone(&disposed);
            move || *disposed.lock().unwrap() += 1
        })
        .on_file_end({
            let ends = Arc::clone(&file_ends);
            move |_| *ends.lock().unwrap() += 1
        });
    writer.write_row(&row(1))?;
    writer.close()?;
    writer.close()?;
    drop(writer);

    assert_eq!(*disposed.lock().unwrap(), 1);
    assert_eq!(*file_ends.lock().unwrap(), 1);
    Ok(())
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl IoWrite for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn borrowed_stream_gets_header_and_rows() -> anyhow::Result<()> {
    let buf = SharedBuf::default();
    let mut writer = Writer::to_stream(buf.clone(), false).columns(["ID", "Name"])?;
    writer.write_row(&row(1))?;
    writer.write_row(&row(2))?;
    writer.close()?;

    let text = String::from_utf8(buf.0.lock().unwrap().clone())?;
    assert_eq!(text, "ID,Name\r\n1,name1\r\n2,name2\r\n");
    Ok(())
}
