use chrono::NaiveDate;
use csv_codec::{Reader, Value, Writer};
use std::fs;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

fn collecting_reader(rows: &Arc<Mutex<Vec<Vec<String>>>>) -> Reader {
    let rows = Arc::clone(rows);
    Reader::new().on_row(move |ev| rows.lock().unwrap().push(ev.values().to_vec()))
}

#[tokio::test]
async fn typed_rows_survive_a_write_read_cycle() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dt = NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_milli_opt(10, 30, 0, 123)
        .unwrap();

    let mut writer = Writer::to_dir(dir.path())
        .file_prefix("cycle")
        .columns(["s", "n", "f", "d", "b"])?;
    writer.write_row(&[
        Value::from("plain"),
        Value::from(1),
        Value::from(1.5),
        Value::from(dt),
        Value::from(true),
    ])?;
    writer.write_row(&[
        Value::from("a,\"b\"\r\nc"),
        Value::from(-7),
        Value::from(0.25),
        Value::Null,
        Value::from(false),
    ])?;
    writer.close()?;

    let rows = Arc::new(Mutex::new(Vec::new()));
    let names = Arc::new(Mutex::new(Vec::new()));
    let mut reader = collecting_reader(&rows).on_head({
        let names = Arc::clone(&names);
        move |ev| *names.lock().unwrap() = ev.names().to_vec()
    });
    reader.read_path(dir.path().join("cycle-1.csv")).await?;

    assert_eq!(*names.lock().unwrap(), vec!["s", "n", "f", "d", "b"]);
    assert_eq!(
        *rows.lock().unwrap(),
        vec![
            vec!["plain", "1", "1.5", "2024-01-15 10:30:00.123", "true"],
            vec!["a,\"b\"\r\nc", "-7", "0.25", "", "false"],
        ]
    );
    Ok(())
}

#[tokio::test]
async fn numeric_marker_is_transparent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut writer = Writer::to_dir(dir.path())
        .file_prefix("marked")
        .number_as_text(true)
        .columns(["n", "s"])?;
    writer.write_row(&[Value::from(123), Value::from("x")])?;
    writer.close()?;

    // The marker byte is on disk but never reaches the row handler.
    let raw = fs::read_to_string(dir.path().join("marked-1.csv"))?;
    assert!(raw.contains("\t123"));

    let rows = Arc::new(Mutex::new(Vec::new()));
    let mut reader = collecting_reader(&rows);
    reader.read_path(dir.path().join("marked-1.csv")).await?;
    assert_eq!(*rows.lock().unwrap(), vec![vec!["123", "x"]]);
    Ok(())
}

#[tokio::test]
async fn gzip_compressed_files_read_back() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut writer = Writer::to_dir(dir.path())
        .file_prefix("big")
        .columns(["ID", "Name"])?;
    for i in 1..=50 {
        writer.write_row(&[Value::from(i), Value::from(format!("name{i}"))])?;
    }
    writer.close()?;

    let plain = fs::read(dir.path().join("big-1.csv"))?;
    let mut enc = async_compression::tokio::write::GzipEncoder::new(Vec::new());
    enc.write_all(&plain).await?;
    enc.shutdown().await?;
    let gz_path = dir.path().join("big.csv.gz");
    fs::write(&gz_path, enc.into_inner())?;

    let rows = Arc::new(Mutex::new(Vec::new()));
    let mut reader = collecting_reader(&rows);
    reader.read_path(&gz_path).await?;

    let rows = rows.lock().unwrap();
    assert_eq!(rows.len(), 50);
    assert_eq!(rows[0], vec!["1", "name1"]);
    assert_eq!(rows[49], vec!["50", "name50"]);
    Ok(())
}
