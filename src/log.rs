use crate::download::DownloadReport;
use crate::input::PipelineConfig;
use std::time::Duration;

pub fn show_greeting(command: &str) {
    println!("=== NLDAS-2 to Parquet ===");
    println!("Running: {}", command);
}

pub fn config_echo(config: &PipelineConfig) {
    println!("\nConfiguration:");
    println!("  Dataset: {}", config.dataset);
    println!("  Bounding box (W,S,E,N): {}", config.bounding_box);
    println!(
        "  Time range: {} to {}",
        config.time_range.start, config.time_range.end
    );
    println!("  Directory: {}", config.directory.display());
    println!("  Link access: {}", config.access);
    match config.max_granules {
        Some(max) => println!("  Max granules: {}", max),
        None => println!("  Max granules: all"),
    }
    println!("  Workers: {}", config.workers);
}

pub fn show_download_report(report: &DownloadReport) {
    println!("\nDownloads:");
    println!("  New: {}", report.downloaded);
    println!("  Already present: {}", report.skipped);
    println!("  Failed: {}", report.failed);
}

pub fn show_table_summary(rows: usize, columns: usize) {
    println!("\nResult: {} rows x {} columns", rows, columns);
}

pub fn show_farewell_with_timing(elapsed: Duration) {
    println!("\n=== Completed in {:.2?} ===", elapsed);
}
