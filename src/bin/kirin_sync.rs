use kirin::app_context::AppContext;
use kirin::archive::FolderSync;
use kirin::config::Config;
use std::env;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let args: Vec<String> = env::args().collect();
    let program_name = args.first().map(String::as_str).unwrap_or("kirin-sync");

    let request = match parse_args(args.get(1..).unwrap_or(&[])) {
        Ok(request) => request,
        Err(message) => {
            error!("{}", message);
            print_usage(program_name);
            std::process::exit(1);
        }
    };

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let context = match AppContext::init(config).await {
        Ok(context) => context,
        Err(e) => {
            error!("Failed to open archive: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Syncing folder {} into work {} episode {}",
        request.folder, request.work_id, request.episode_number
    );
    match context.archive.sync_episode_from_folder(request).await {
        Ok(mutation) => {
            let report = mutation.value;
            println!(
                "Registered {} images in episode {} ({}){}",
                report.images.len(),
                report.episode.id,
                report.episode.title,
                if report.created_episode {
                    ", episode created"
                } else {
                    ""
                }
            );
        }
        Err(e) => {
            error!("Sync failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Parse `--work <id> --episode <n> --folder <prefix> [--title <t>]`
fn parse_args(args: &[String]) -> Result<FolderSync, String> {
    let mut work_id: Option<i64> = None;
    let mut episode_number: Option<i64> = None;
    let mut folder: Option<String> = None;
    let mut title: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = args
            .get(i + 1)
            .ok_or_else(|| format!("{} requires a value", flag))?;
        match flag {
            "--work" => {
                work_id = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid work id: {}", value))?,
                );
            }
            "--episode" => {
                episode_number = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid episode number: {}", value))?,
                );
            }
            "--folder" => folder = Some(value.clone()),
            "--title" => title = Some(value.clone()),
            _ => return Err(format!("Unknown argument: {}", flag)),
        }
        i += 2;
    }

    Ok(FolderSync {
        work_id: work_id.ok_or("--work is required")?,
        episode_number: episode_number.ok_or("--episode is required")?,
        folder: folder.ok_or("--folder is required")?,
        title,
    })
}

fn print_usage(program_name: &str) {
    eprintln!("Usage:");
    eprintln!(
        "  {} --work <id> --episode <number> --folder <prefix> [--title <title>]",
        program_name
    );
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} --work 1 --episode 1 --folder AKS/001", program_name);
    eprintln!(
        "  {} --work 1 --episode 2 --folder AKS/002 --title \"2화 - 재회\"",
        program_name
    );
}
