//! CLI subcommands: thin HTTP dispatch to the daemon plus direct
//! filesystem operations for stats and cleanup.

use std::time::Duration;

use serde_json::Value;

use config_manager::Config;
use storage_manager::{disk, format_bytes, prune_by_age, recording_stats};
use transcode_engine::TranscodingStats;

/// CLI failures; validation exits 1, operational exits 2
pub enum CliError {
    Validation(String),
    Operational(String),
}

fn daemon_url(config: &Config, path: &str) -> String {
    let host = match config.http.host.as_str() {
        "0.0.0.0" | "::" => "127.0.0.1",
        other => other,
    };
    format!("http://{}:{}{}", host, config.http.port, path)
}

fn client() -> Result<reqwest::blocking::Client, CliError> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| CliError::Operational(e.to_string()))
}

fn get(config: &Config, path: &str) -> Result<Value, CliError> {
    let response = client()?
        .get(daemon_url(config, path))
        .send()
        .map_err(|e| CliError::Operational(format!("daemon not reachable: {}", e)))?;
    parse_response(response)
}

fn post(config: &Config, path: &str) -> Result<Value, CliError> {
    let response = client()?
        .post(daemon_url(config, path))
        .send()
        .map_err(|e| CliError::Operational(format!("daemon not reachable: {}", e)))?;
    parse_response(response)
}

fn parse_response(response: reqwest::blocking::Response) -> Result<Value, CliError> {
    let status = response.status();
    let body: Value = response
        .json()
        .map_err(|e| CliError::Operational(format!("bad response: {}", e)))?;
    if status.is_success() {
        return Ok(body);
    }
    let message = body
        .get("error")
        .and_then(|e| e.as_str())
        .unwrap_or("request failed")
        .to_string();
    if status.is_client_error() {
        Err(CliError::Validation(message))
    } else {
        Err(CliError::Operational(message))
    }
}

pub fn status(config: &Config) -> Result<(), CliError> {
    let cameras = get(config, "/api/cameras")?;
    let Some(cameras) = cameras.as_array() else {
        return Err(CliError::Operational("unexpected response".to_string()));
    };

    println!(
        "{:<12} {:<20} {:<10} {:<8} {:<8}",
        "ID", "NAME", "STATE", "PID", "UPTIME"
    );
    for cam in cameras {
        println!(
            "{:<12} {:<20} {:<10} {:<8} {:<8}",
            cam["id"].as_str().unwrap_or("-"),
            cam["name"].as_str().unwrap_or("-"),
            cam["state"].as_str().unwrap_or("-"),
            cam["pid"]
                .as_u64()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            cam["uptime_secs"]
                .as_u64()
                .map(|s| format!("{}s", s))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

pub fn control(config: &Config, op: &str, id: &str) -> Result<(), CliError> {
    if id == "all" {
        let body = if op == "restart" {
            let body = post(config, "/api/system/restart_cameras")?;
            println!(
                "{}",
                body["message"].as_str().unwrap_or("restart finished")
            );
            body
        } else {
            post(config, &format!("/api/{}_all", op))?
        };
        if let Some(results) = body["results"].as_object() {
            for (id, outcome) in results {
                println!("{}: {}", id, outcome.as_str().unwrap_or("?"));
            }
        }
        return Ok(());
    }

    if !config.sources.contains_key(id) {
        return Err(CliError::Validation(format!("unknown source: {}", id)));
    }
    post(config, &format!("/api/camera/{}/{}", id, op))?;
    println!("{}: {} ok", id, op);
    Ok(())
}

pub fn stats(config: &Config) -> Result<(), CliError> {
    let base = &config.recordings_base_directory;
    let stats =
        recording_stats(base).map_err(|e| CliError::Operational(e.to_string()))?;

    println!("Total files: {}", stats.total_files);
    println!("Total size:  {}", format_bytes(stats.total_bytes));

    if let Ok(usage) = disk::usage(base) {
        println!(
            "Disk usage:  {} / {} ({:.1}% used)",
            format_bytes(usage.used_bytes()),
            format_bytes(usage.total_bytes),
            usage.used_fraction * 100.0
        );
    }

    for (id, source) in &stats.sources {
        println!();
        println!("{}:", id);
        println!("  files: {}", source.file_count);
        println!("  size:  {}", format_bytes(source.total_bytes));
        if let Some(newest) = &source.newest_file {
            println!("  newest: {}", newest);
        }
        if let Some(oldest) = &source.oldest_file {
            println!("  oldest: {}", oldest);
        }
    }
    Ok(())
}

pub fn cleanup(config: &Config, dry_run: bool) -> Result<(), CliError> {
    let max_age = Duration::from_secs(config.storage.max_age_days as u64 * 86400);
    let outcome = prune_by_age(&config.recordings_base_directory, max_age, dry_run)
        .map_err(|e| CliError::Operational(e.to_string()))?;

    println!("Files removed: {}", outcome.removed_count);
    println!("Space freed:   {}", format_bytes(outcome.freed_bytes));
    if dry_run {
        println!("(dry run - nothing was deleted)");
    }
    Ok(())
}

pub fn transcode_stats(config: &Config) -> Result<(), CliError> {
    let stats = TranscodingStats::load(&config.recordings_base_directory);

    println!("Enabled (config): {}", config.transcoder.enabled);
    println!("Files transcoded: {}", stats.files_transcoded);
    println!("Files failed:     {}", stats.files_failed);
    println!("Space saved:      {}", format_bytes(stats.space_saved_bytes));
    if stats.total_original_bytes > 0 {
        println!("Savings:          {:.1}%", stats.savings_percent());
    }
    if let Some(last) = &stats.last_transcoded {
        println!("Last transcoded:  {}", last);
    }
    if let Some(error) = &stats.last_error {
        println!("Last error:       {}", error);
    }
    Ok(())
}

pub fn transcode_toggle(config: &Config, enable: bool) -> Result<(), CliError> {
    let path = if enable {
        "/api/transcoding/enable"
    } else {
        "/api/transcoding/disable"
    };
    post(config, path)?;
    println!(
        "transcoder {}",
        if enable { "enabled" } else { "disabled" }
    );
    Ok(())
}
