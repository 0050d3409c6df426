//! Parquet I/O for bar partitions and daily archives
//!
//! Decimal columns are stored as Utf8 strings to keep full precision;
//! window_start is a UTC microsecond timestamp. Partitions live under
//! hive-style `year=/month=/day=` directories per symbol.

use super::Bar;
use arrow::array::{Array, ArrayRef, StringArray, TimestampMicrosecondArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Datelike, NaiveDate};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Bar schema, in wire order
pub fn bar_schema() -> Schema {
    let ts = DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()));
    Schema::new(vec![
        Field::new("symbol", DataType::Utf8, false),
        Field::new("window_start", ts, false),
        Field::new("open", DataType::Utf8, true),
        Field::new("high", DataType::Utf8, true),
        Field::new("low", DataType::Utf8, true),
        Field::new("close", DataType::Utf8, true),
        Field::new("volume_base", DataType::Utf8, false),
        Field::new("volume_quote", DataType::Utf8, false),
        Field::new("trade_count", DataType::UInt64, false),
        Field::new("vwap", DataType::Utf8, true),
        Field::new("bid", DataType::Utf8, true),
        Field::new("ask", DataType::Utf8, true),
        Field::new("spread", DataType::Utf8, true),
    ])
}

/// Partition directory for one symbol/day:
/// `{bars_root}/{SYMBOL}/year=Y/month=M/day=D`
pub fn partition_dir(bars_root: &Path, symbol: &str, date: NaiveDate) -> PathBuf {
    bars_root.join(symbol).join(format!(
        "year={}/month={}/day={}",
        date.year(),
        date.month(),
        date.day()
    ))
}

/// Daily archive file: `{bars_root}/{SYMBOL}/{date}.parquet`
pub fn archive_path(bars_root: &Path, symbol: &str, date: NaiveDate) -> PathBuf {
    bars_root.join(symbol).join(format!("{}.parquet", date))
}

/// Metadata sidecar next to the archive
pub fn sidecar_path(bars_root: &Path, symbol: &str, date: NaiveDate) -> PathBuf {
    bars_root.join(symbol).join(format!("{}.meta.json", date))
}

/// Integrity failure report next to the archive
pub fn failure_report_path(bars_root: &Path, symbol: &str, date: NaiveDate) -> PathBuf {
    bars_root.join(symbol).join(format!("{}.failure.json", date))
}

/// Parquet files in a partition directory, name-sorted
pub fn list_partition_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "parquet"))
        .collect();
    files.sort();
    Ok(files)
}

/// Write a bar sequence to a Parquet file (SNAPPY-compressed)
pub fn write_bars(path: &Path, bars: &[Bar]) -> anyhow::Result<()> {
    let schema = Arc::new(bar_schema());
    let file = File::create(path)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

    fn opt_col(bars: &[Bar], f: impl Fn(&Bar) -> Option<Decimal>) -> ArrayRef {
        let values: Vec<Option<String>> = bars.iter().map(|b| f(b).map(|d| d.to_string())).collect();
        Arc::new(StringArray::from(values))
    }

    let symbols: Vec<&str> = bars.iter().map(|b| b.symbol.as_str()).collect();
    let windows: Vec<i64> = bars
        .iter()
        .map(|b| b.window_start.timestamp_micros())
        .collect();
    let volume_base: Vec<String> = bars.iter().map(|b| b.volume_base.to_string()).collect();
    let volume_quote: Vec<String> = bars.iter().map(|b| b.volume_quote.to_string()).collect();
    let trade_counts: Vec<u64> = bars.iter().map(|b| b.trade_count).collect();

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(symbols)) as ArrayRef,
            Arc::new(TimestampMicrosecondArray::from(windows).with_timezone("UTC")) as ArrayRef,
            opt_col(bars, |b| b.open),
            opt_col(bars, |b| b.high),
            opt_col(bars, |b| b.low),
            opt_col(bars, |b| b.close),
            Arc::new(StringArray::from(
                volume_base.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            )) as ArrayRef,
            Arc::new(StringArray::from(
                volume_quote.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            )) as ArrayRef,
            Arc::new(UInt64Array::from(trade_counts)) as ArrayRef,
            opt_col(bars, |b| b.vwap),
            opt_col(bars, |b| b.bid),
            opt_col(bars, |b| b.ask),
            opt_col(bars, |b| b.spread),
        ],
    )?;

    writer.write(&batch)?;
    writer.close()?;

    tracing::debug!(path = %path.display(), count = bars.len(), "Wrote bars to Parquet");
    Ok(())
}

/// Read a bar sequence back from a Parquet file, in row order
pub fn read_bars(path: &Path) -> anyhow::Result<Vec<Bar>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut bars = Vec::new();
    for batch_result in reader {
        let batch = batch_result?;

        let str_col = |i: usize| -> anyhow::Result<&StringArray> {
            batch
                .column(i)
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| anyhow::anyhow!("column {} is not Utf8", i))
        };

        let symbols = str_col(0)?;
        let windows = batch
            .column(1)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .ok_or_else(|| anyhow::anyhow!("window_start is not a microsecond timestamp"))?;
        let trade_counts = batch
            .column(8)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .ok_or_else(|| anyhow::anyhow!("trade_count is not UInt64"))?;

        let opens = str_col(2)?;
        let highs = str_col(3)?;
        let lows = str_col(4)?;
        let closes = str_col(5)?;
        let volume_base = str_col(6)?;
        let volume_quote = str_col(7)?;
        let vwaps = str_col(9)?;
        let bids = str_col(10)?;
        let asks = str_col(11)?;
        let spreads = str_col(12)?;

        let opt_decimal = |arr: &StringArray, i: usize| -> anyhow::Result<Option<Decimal>> {
            if arr.is_null(i) {
                Ok(None)
            } else {
                Ok(Some(Decimal::from_str(arr.value(i))?))
            }
        };

        for i in 0..batch.num_rows() {
            bars.push(Bar {
                symbol: symbols.value(i).to_string(),
                window_start: DateTime::from_timestamp_micros(windows.value(i))
                    .ok_or_else(|| anyhow::anyhow!("invalid window_start timestamp"))?,
                open: opt_decimal(opens, i)?,
                high: opt_decimal(highs, i)?,
                low: opt_decimal(lows, i)?,
                close: opt_decimal(closes, i)?,
                volume_base: Decimal::from_str(volume_base.value(i))?,
                volume_quote: Decimal::from_str(volume_quote.value(i))?,
                trade_count: trade_counts.value(i),
                vwap: opt_decimal(vwaps, i)?,
                bid: opt_decimal(bids, i)?,
                ask: opt_decimal(asks, i)?,
                spread: opt_decimal(spreads, i)?,
            });
        }
    }

    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn sample_bars() -> Vec<Bar> {
        vec![
            Bar {
                symbol: "BTCUSDT".to_string(),
                window_start: Utc.timestamp_millis_opt(1704067200000).unwrap(),
                open: Some(dec!(10)),
                high: Some(dec!(11)),
                low: Some(dec!(9)),
                close: Some(dec!(9)),
                volume_base: dec!(3.5),
                volume_quote: dec!(35.5),
                trade_count: 3,
                vwap: Some(dec!(10.142857)),
                bid: Some(dec!(8.99)),
                ask: Some(dec!(9.01)),
                spread: Some(dec!(0.02)),
            },
            Bar {
                symbol: "BTCUSDT".to_string(),
                window_start: Utc.timestamp_millis_opt(1704067201000).unwrap(),
                open: None,
                high: None,
                low: None,
                close: None,
                volume_base: dec!(0),
                volume_quote: dec!(0),
                trade_count: 0,
                vwap: None,
                bid: Some(dec!(8.99)),
                ask: Some(dec!(9.01)),
                spread: Some(dec!(0.02)),
            },
        ]
    }

    #[test]
    fn test_schema_order() {
        let schema = bar_schema();
        assert_eq!(schema.fields().len(), 13);
        assert_eq!(schema.field(0).name(), "symbol");
        assert_eq!(schema.field(1).name(), "window_start");
        assert_eq!(schema.field(8).name(), "trade_count");
        assert_eq!(schema.field(12).name(), "spread");
    }

    #[test]
    fn test_partition_and_archive_paths() {
        let root = PathBuf::from("/data/bars");
        let date = NaiveDate::from_ymd_opt(2025, 1, 4).unwrap();
        assert_eq!(
            partition_dir(&root, "BTCUSDT", date),
            PathBuf::from("/data/bars/BTCUSDT/year=2025/month=1/day=4")
        );
        assert_eq!(
            archive_path(&root, "BTCUSDT", date),
            PathBuf::from("/data/bars/BTCUSDT/2025-01-04.parquet")
        );
        assert_eq!(
            sidecar_path(&root, "BTCUSDT", date),
            PathBuf::from("/data/bars/BTCUSDT/2025-01-04.meta.json")
        );
    }

    #[test]
    fn test_write_read_round_trip_preserves_nulls() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bars.parquet");
        let bars = sample_bars();
        write_bars(&path, &bars).unwrap();

        let read = read_bars(&path).unwrap();
        assert_eq!(read, bars);
        assert!(read[1].is_gap());
        assert_eq!(read[1].open, None);
    }

    #[test]
    fn test_list_partition_files_sorted() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("part-00001.parquet"), b"x").unwrap();
        std::fs::write(tmp.path().join("part-00000.parquet"), b"x").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();

        let files = list_partition_files(tmp.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("part-00000.parquet"));
    }

    #[test]
    fn test_list_partition_files_missing_dir() {
        let files = list_partition_files(Path::new("/nonexistent/dir")).unwrap();
        assert!(files.is_empty());
    }
}
