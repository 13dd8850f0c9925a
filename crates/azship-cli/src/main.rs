//! 🚀 azship-cli: pipe NDJSON in, watch blobs come out.
//!
//! 🎬 *[narrator voice]* "It all started with `tail -F access.log | jq -c`..."
//!
//! Each input line is one of:
//! - `{"msg": "hi"}`: a record, stamped with the current time
//! - `[1704067200, {"msg": "hi"}]`: Unix seconds (integer or fractional)
//! - `["2024-01-01T00:00:00Z", {"msg": "hi"}]`: RFC 3339
//!
//! Anything else in the timestamp slot becomes "unknown" and the sink uses now.
//! Lines that aren't JSON get a warning and are skipped. EOF or Ctrl-C shuts the
//! sink down, drains it, and prints what happened. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use azship::{EventTime, Record, Shipper, ShipperStats};
use chrono::{DateTime, Utc};
use clap::Parser;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// 📦 Ship NDJSON log records to Azure Blob Storage in time-sliced batches.
#[derive(Debug, Parser)]
#[command(name = "azship", version, about)]
struct Args {
    /// TOML config file. Skipped if it doesn't exist (env vars alone can configure the sink).
    #[arg(short, long, env = "AZSHIP_CONFIG", default_value = "azship.toml")]
    config: PathBuf,

    /// NDJSON input. Defaults to stdin.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Log level or filter directive. `RUST_LOG` wins if set; otherwise this beats the config file.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Err(err) = run(args).await {
        // -- 🧅 subscriber may not exist yet if config failed, so say it twice: logs and stderr
        error!("💀 error: {err}");
        eprintln!("💀 error: {err}");
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {cause}");
            eprintln!("⚠️  cause: {cause}");
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config_file = args.config.as_path();
    let config_file = match config_file.try_exists().context(format!(
        "💀 Couldn't check whether the configuration file exists. Was checking here: '{}'",
        config_file.display()
    ))? {
        true => Some(config_file),
        false => None,
    };

    let app_config = azship::load_config(config_file)
        .context("💀 In azship-cli, we couldn't load the configuration. Check the file and the AZSHIP_* env vars.")?;

    let settings = app_config
        .resolve()
        .context("💀 Configuration rejected. The sink will not start.")?;
    let filter = log_filter(
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        args.log_level.as_deref(),
        settings.log_level,
    )?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "🔧 config: file={:?} destination={:?} store_as={:?} wait={}s limit={} retry_limit={:?}",
        config_file,
        destination_label(&app_config.destination),
        app_config.output.store_as,
        app_config.batch.wait_secs,
        app_config.batch.limit_size,
        app_config.batch.retry_limit
    );

    let shipper = Shipper::initialize(&app_config)?;

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            tokio::fs::File::open(path)
                .await
                .context(format!("💀 couldn't open input '{}'", path.display()))?,
        )),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let pumped = tokio::select! {
        result = pump(reader, &shipper) => result.map(|skipped| {
            if skipped > 0 {
                warn!("⚠️ {skipped} input lines were skipped");
            }
        }),
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Ctrl-C received. Draining what we have.");
            Ok(())
        }
    };
    // -- 🏁 drain even if the input side blew up. buffered records deserve their ride.
    let drained = shipper.shutdown().await;

    println!("{}", render_summary(&shipper.stats()));
    pumped?;
    drained
}

/// 🔊 `RUST_LOG` if set, else the `--log-level` directives, else the configured level.
fn log_filter(rust_log: Option<String>, flag: Option<&str>, configured: LevelFilter) -> Result<EnvFilter> {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return EnvFilter::try_new(&directives)
            .context(format!("💀 {}='{directives}' is not a valid filter", EnvFilter::DEFAULT_ENV));
    }
    match flag {
        Some(directives) => EnvFilter::try_new(directives)
            .context(format!("💀 --log-level '{directives}' is not a valid filter")),
        None => Ok(EnvFilter::default().add_directive(configured.into())),
    }
}

fn destination_label(destination: &azship::DestinationConfig) -> String {
    match destination {
        azship::DestinationConfig::Azure(azure) => {
            format!("azure://{}/{}", azure.storage_account, azure.container)
        }
        azship::DestinationConfig::InMemory(_) => "memory://".to_string(),
    }
}

/// 📨 Reads lines until EOF and submits each parsed record. Returns how many lines were skipped.
async fn pump<R: AsyncBufRead + Unpin>(reader: R, shipper: &Shipper) -> Result<u64> {
    let mut lines = reader.lines();
    let mut skipped = 0u64;
    let mut line_number = 0u64;
    while let Some(line) = lines
        .next_line()
        .await
        .context("💀 reading input failed")?
    {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Ok((record, time)) => {
                if let Err(err) = shipper.submit(&record, time).await {
                    warn!("⚠️ line {line_number}: sink refused the record: {err:#}");
                    skipped += 1;
                }
            }
            Err(err) => {
                warn!("⚠️ line {line_number}: skipped: {err:#}");
                skipped += 1;
            }
        }
    }
    Ok(skipped)
}

/// 🔍 One NDJSON line → record + timestamp.
fn parse_line(line: &str) -> Result<(Record, EventTime)> {
    let value: serde_json::Value =
        serde_json::from_str(line).context("not valid JSON")?;
    match value {
        serde_json::Value::Object(_) => Ok((Record::try_from(value)?, EventTime::Structured(Utc::now()))),
        serde_json::Value::Array(items) if items.len() == 2 => {
            let mut items = items.into_iter();
            let (Some(timestamp), Some(body)) = (items.next(), items.next()) else {
                anyhow::bail!("expected [timestamp, record]");
            };
            Ok((Record::try_from(body)?, parse_timestamp(&timestamp)))
        }
        other => anyhow::bail!("expected an object or [timestamp, object], got {other}"),
    }
}

fn parse_timestamp(value: &serde_json::Value) -> EventTime {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(secs) = n.as_u64() {
                return EventTime::UnixSeconds(secs);
            }
            n.as_f64()
                .filter(|f| f.is_finite())
                .and_then(|f| {
                    let secs = f.floor();
                    let nanos = (((f - secs) * 1e9).round() as u32).min(999_999_999);
                    DateTime::<Utc>::from_timestamp(secs as i64, nanos)
                })
                .map(EventTime::Structured)
                .unwrap_or(EventTime::Unknown)
        }
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|ts| EventTime::Structured(ts.with_timezone(&Utc)))
            .unwrap_or(EventTime::Unknown),
        _ => EventTime::Unknown,
    }
}

/// 📊 The end-of-run table.
fn render_summary(stats: &ShipperStats) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["📊 azship", "count"]);
    let rows: [(&str, u64); 8] = [
        ("records submitted", stats.records_submitted),
        ("records rejected", stats.records_rejected),
        ("batches flushed", stats.batches_flushed),
        ("records flushed", stats.records_flushed),
        ("bytes uploaded", stats.bytes_uploaded),
        ("upload retries", stats.upload_retries),
        ("batches dropped", stats.batches_dropped),
        ("records dropped", stats.records_dropped),
    ];
    for (label, count) in rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(count).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn the_one_where_a_bare_object_is_stamped_now() -> Result<()> {
        let before = Utc::now();
        let (record, time) = parse_line(r#"{"msg":"hi"}"#)?;
        assert_eq!(record.len(), 1);
        match time {
            EventTime::Structured(ts) => assert!(ts >= before),
            other => panic!("💀 expected now, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn the_one_where_every_timestamp_shape_is_understood() -> Result<()> {
        let (_, time) = parse_line(r#"[1704067200, {"a":1}]"#)?;
        assert_eq!(time, EventTime::UnixSeconds(1_704_067_200));

        let (_, time) = parse_line(r#"[1704067200.5, {"a":1}]"#)?;
        let expected = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z")?.with_timezone(&Utc);
        assert_eq!(time, EventTime::Structured(expected));

        let (_, time) = parse_line(r#"["2024-01-01T09:00:00+09:00", {"a":1}]"#)?;
        let expected = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")?.with_timezone(&Utc);
        assert_eq!(time, EventTime::Structured(expected));

        let (_, time) = parse_line(r#"[{"weird":true}, {"a":1}]"#)?;
        assert_eq!(time, EventTime::Unknown);
        Ok(())
    }

    #[test]
    fn the_one_where_garbage_lines_are_refused() {
        assert!(parse_line("not json").is_err());
        assert!(parse_line("42").is_err());
        assert!(parse_line(r#"[1, 2, 3]"#).is_err());
        assert!(parse_line(r#"[1, "not an object"]"#).is_err());
    }

    #[test]
    fn the_one_where_the_configured_level_drives_the_log_filter() -> Result<()> {
        let filter = log_filter(None, None, LevelFilter::DEBUG)?;
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));

        let filter = log_filter(None, Some("azship=trace,warn"), LevelFilter::DEBUG)?;
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));

        let filter = log_filter(Some("error".into()), Some("trace"), LevelFilter::DEBUG)?;
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::ERROR));

        assert!(log_filter(None, Some("azship=shouting"), LevelFilter::INFO).is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_the_summary_shows_every_counter() {
        let stats = ShipperStats {
            records_submitted: 12,
            batches_dropped: 3,
            ..ShipperStats::default()
        };
        let rendered = render_summary(&stats).to_string();
        assert!(rendered.contains("records submitted"));
        assert!(rendered.contains("12"));
        assert!(rendered.contains("batches dropped"));
    }

    #[tokio::test]
    async fn the_one_where_good_lines_ship_and_bad_ones_are_counted() -> Result<()> {
        let mut config = tempfile::Builder::new().suffix(".toml").tempfile()?;
        config.write_all(b"[destination.InMemory]\n[output]\nstore_as = \"plain\"\n")?;
        let app_config = azship::load_config(Some(config.path()))?;
        let shipper = Shipper::initialize(&app_config)?;

        let input = b"{\"a\":1}\n\nnope\n[1704067200, {\"a\":2}]\n".as_slice();
        let skipped = pump(input, &shipper).await?;
        shipper.shutdown().await?;

        assert_eq!(skipped, 1);
        assert_eq!(shipper.stats().records_submitted, 2);
        assert_eq!(shipper.stats().records_flushed, 2);
        Ok(())
    }
}
