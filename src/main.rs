use std::error::Error;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;
use ulid::Ulid;

use innkeep::config::Config;
use innkeep::engine::{Engine, today};
use innkeep::model::{DateSpan, RoomSearch};

const USAGE: &str = "usage:
  innkeep quote <room-id> [date]
  innkeep stay <room-id> <check-in> <check-out>
  innkeep calendar <room-id> <start> <end>
  innkeep available <room-id> <check-in> <check-out>
  innkeep rooms <check-in> <check-out>
  innkeep compact

dates are YYYY-MM-DD";

type CliResult<T> = Result<T, Box<dyn Error>>;

fn arg<'a>(args: &'a [String], i: usize, what: &str) -> CliResult<&'a str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| format!("missing {what}\n\n{USAGE}").into())
}

fn room_arg(args: &[String], i: usize) -> CliResult<Ulid> {
    let raw = arg(args, i, "room id")?;
    Ulid::from_string(raw).map_err(|e| format!("bad room id {raw:?}: {e}").into())
}

fn date_arg(args: &[String], i: usize, what: &str) -> CliResult<NaiveDate> {
    let raw = arg(args, i, what)?;
    raw.parse()
        .map_err(|e| format!("bad {what} {raw:?}: {e}").into())
}

fn print_json(value: &impl Serialize) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> CliResult<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    innkeep::observability::init(config.metrics_port)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Engine::new(config.journal_path())?;
    info!(data_dir = %config.data_dir.display(), "innkeep ready");

    match command {
        "quote" => {
            let room = room_arg(&args, 1)?;
            let date = match args.get(2) {
                Some(_) => date_arg(&args, 2, "date")?,
                None => today(),
            };
            print_json(&engine.resolve_nightly_price(room, date).await?)
        }
        "stay" => {
            let room = room_arg(&args, 1)?;
            let check_in = date_arg(&args, 2, "check-in")?;
            let check_out = date_arg(&args, 3, "check-out")?;
            print_json(&engine.quote_stay(room, check_in, check_out).await?)
        }
        "calendar" => {
            let room = room_arg(&args, 1)?;
            let start = date_arg(&args, 2, "start")?;
            let end = date_arg(&args, 3, "end")?;
            print_json(&engine.price_calendar(room, start, end).await?)
        }
        "available" => {
            let room = room_arg(&args, 1)?;
            let check_in = date_arg(&args, 2, "check-in")?;
            let check_out = date_arg(&args, 3, "check-out")?;
            if check_in >= check_out {
                return Err("check-in must be before check-out".into());
            }
            let free = engine.is_available(room, check_in, check_out, None).await?;
            print_json(&serde_json::json!({ "room_id": room, "available": free }))
        }
        "rooms" => {
            let check_in = date_arg(&args, 1, "check-in")?;
            let check_out = date_arg(&args, 2, "check-out")?;
            let window = DateSpan::try_new(check_in, check_out)
                .ok_or("check-in must be before check-out")?;
            let search = RoomSearch {
                window,
                category_id: None,
                floor_id: None,
                min_capacity: None,
            };
            print_json(&engine.available_rooms(&search).await?)
        }
        "compact" => {
            engine.compact_journal().await?;
            Ok(())
        }
        other => Err(format!("unknown command {other:?}\n\n{USAGE}").into()),
    }
}
