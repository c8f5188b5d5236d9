mod app;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tenki_core::AppError;
use tenki_forecast::{
    DayForecast, HistoryLookup, Selection, SelectionOutcome, SelectionPhase, ZoneGroup,
};

use app::App;

const USAGE: &str = "\
Usage:
  tenki                          show the configured default region
  tenki regions                  list regions by zone and office
  tenki select <id> [name]       fetch a region's forecast and save it
  tenki history <id> <date>      show the saved forecast for YYYY-MM-DD
  tenki reset-history            delete all saved forecasts";

enum Command {
    Default,
    Regions,
    Select { id: String, name: Option<String> },
    History { id: String, date: NaiveDate },
    ResetHistory,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let command = match args {
        [] => Command::Default,
        [cmd] if cmd == "regions" => Command::Regions,
        [cmd] if cmd == "reset-history" => Command::ResetHistory,
        [cmd, id] if cmd == "select" => Command::Select {
            id: id.clone(),
            name: None,
        },
        [cmd, id, name] if cmd == "select" => Command::Select {
            id: id.clone(),
            name: Some(name.clone()),
        },
        [cmd, id, date] if cmd == "history" => Command::History {
            id: id.clone(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", date))?,
        },
        _ => anyhow::bail!("{}", USAGE),
    };
    Ok(command)
}

#[tokio::main]
async fn main() -> Result<()> {
    tenki_core::init()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    let (config, _) = tenki_core::Config::load_validated().unwrap_or_else(|e| exit_with(&e));
    let app = App::open(config).unwrap_or_else(|e| exit_with(&e));

    match command {
        Command::History { id, date } => match app.lookup_history(&id, date) {
            HistoryLookup::Found(row) => {
                println!("Saved forecast for {} ({}):", row.region_name, date);
                print_day(&row.to_forecast());
            }
            HistoryLookup::NotFound => println!("No saved forecast for {} on {}.", id, date),
            HistoryLookup::Error(e) => eprintln!("{}", e.user_message()),
        },
        Command::ResetHistory => {
            app.reset_history().unwrap_or_else(|e| exit_with(&e));
            println!("Forecast history cleared.");
        }
        Command::Regions => {
            let pipeline = app.connect().await.unwrap_or_else(|e| exit_with(&e));
            print_regions(&pipeline.list_regions_grouped());
        }
        Command::Default => {
            let region = app.config().default_region.clone();
            select(&app, &region.id, Some(region.name)).await;
        }
        Command::Select { id, name } => select(&app, &id, name).await,
    }

    Ok(())
}

fn exit_with(error: &AppError) -> ! {
    tracing::error!("{}", error);
    eprintln!("{}", error.user_message());
    std::process::exit(1);
}

async fn select(app: &App, region_id: &str, region_name: Option<String>) {
    let pipeline = app.connect().await.unwrap_or_else(|e| exit_with(&e));
    let region_name = region_name.unwrap_or_else(|| {
        pipeline
            .catalog()
            .region(region_id)
            .map_or_else(|| region_id.to_string(), |r| r.name.clone())
    });

    let display = app::run_selection(&pipeline, region_id, &region_name, |phase| {
        if phase == SelectionPhase::Fetching {
            println!("Fetching forecast for {}...", region_name);
        }
    })
    .await
    .unwrap_or_else(|e| exit_with(&e));

    if let Some(selection) = display.shown() {
        show_selection(selection);
    }
}

fn show_selection(selection: &Selection) {
    if !selection.outcome.is_failed() {
        println!("{} ({})", selection.region_name, selection.region_id);
        for day in selection.outcome.forecasts() {
            print_day(day);
        }
    }
    if let Some(message) = selection.outcome.user_message() {
        eprintln!("{}", message);
    }
    if let SelectionOutcome::Failed { error } = &selection.outcome {
        if error.is_retryable() {
            eprintln!("Run the same command again to retry.");
        }
    }
}

fn print_day(day: &DayForecast) {
    println!(
        "  {}  {}  {}℃ / {}℃",
        day.date,
        day.weather,
        day.temp_min.as_deref().unwrap_or("--"),
        day.temp_max.as_deref().unwrap_or("--"),
    );
}

fn print_regions(zones: &[ZoneGroup]) {
    for zone in zones {
        println!("{} ({})", zone.name, zone.id);
        for office in &zone.offices {
            println!("  {} ({})", office.name, office.id);
            for area in &office.areas {
                println!("    {} ({})", area.name, area.id);
            }
        }
    }
}
