use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use nldas2parquet::auth::{Credentials, EarthdataSession};
use nldas2parquet::cli::{
    load_base_config, resolve_config, Cli, Commands, OutputFormat, QueryArgs, RunOverrides,
};
use nldas2parquet::input::PipelineConfig;
use nldas2parquet::log::{
    config_echo, show_download_report, show_farewell_with_timing, show_greeting,
    show_table_summary,
};
use nldas2parquet::output::write_table_async;
use nldas2parquet::{download_granules, filter_directory, process_directory, search_links};
use polars::prelude::DataFrame;
use std::time::Instant;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let start_time = Instant::now();
    match cli.command {
        Commands::Fetch {
            ref query,
            ref dir,
            workers,
            download_concurrency,
            ref output,
            raw,
        } => {
            let overrides = RunOverrides {
                directory: dir.clone(),
                workers,
                download_concurrency,
            };
            let config = resolve_config(load_base_config(cli.config.as_deref())?, query, &overrides)?;
            if !cli.quiet {
                show_greeting("fetch");
                config_echo(&config);
            }

            let credentials = Credentials::discover()?;
            let session = EarthdataSession::login(&credentials, &config.urs_url)
                .await
                .context("Earthdata login failed")?;

            let report = download_granules(&session, &config, !cli.quiet).await?;
            if !cli.quiet {
                show_download_report(&report);
            }

            let table = build_table(&config, raw).await?;
            emit_table(&table, output.as_deref(), cli.quiet).await?;
        }

        Commands::Process {
            ref dir,
            bbox,
            workers,
            ref output,
            raw,
        } => {
            let query = QueryArgs {
                bbox,
                ..Default::default()
            };
            let overrides = RunOverrides {
                directory: dir.clone(),
                workers,
                download_concurrency: None,
            };
            let config = resolve_config(load_base_config(cli.config.as_deref())?, &query, &overrides)?;
            if !cli.quiet {
                show_greeting("process");
                config_echo(&config);
            }

            let table = build_table(&config, raw).await?;
            emit_table(&table, output.as_deref(), cli.quiet).await?;
        }

        Commands::Search { ref query, format } => {
            let config = resolve_config(
                load_base_config(cli.config.as_deref())?,
                query,
                &RunOverrides::default(),
            )?;
            let credentials = Credentials::discover()?;
            let session = EarthdataSession::login(&credentials, &config.urs_url)
                .await
                .context("Earthdata login failed")?;

            let links = search_links(&session, &config).await?;
            match format {
                OutputFormat::Human => {
                    for link in &links {
                        println!("{}", link);
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&links)?),
            }
            return Ok(());
        }

        Commands::Template { ref output, format } => {
            let rendered = format.render(&PipelineConfig::baseline())?;
            match output {
                Some(path) => {
                    std::fs::write(path, rendered)
                        .with_context(|| format!("Failed to write template to {}", path.display()))?;
                    info!("Template written to {}", path.display());
                }
                None => print!("{}", rendered),
            }
            return Ok(());
        }

        Commands::Completions { shell, ref output } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            match output {
                Some(path) => {
                    let mut file = std::fs::File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    clap_complete::generate(shell, &mut cmd, name, &mut file);
                }
                None => clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout()),
            }
            return Ok(());
        }
    }

    if !cli.quiet {
        show_farewell_with_timing(start_time.elapsed());
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

async fn build_table(config: &PipelineConfig, raw: bool) -> Result<DataFrame> {
    let table = if raw {
        filter_directory(config).await?
    } else {
        process_directory(config).await?
    };
    debug!("Result shape: {:?}", table.shape());
    Ok(table)
}

async fn emit_table(table: &DataFrame, output: Option<&str>, quiet: bool) -> Result<()> {
    match output {
        Some(path) => {
            write_table_async(table, path)
                .await
                .with_context(|| format!("Failed to write {}", path))?;
            info!("Wrote {} rows to {}", table.height(), path);
        }
        None => println!("{}", table),
    }
    if !quiet {
        show_table_summary(table.height(), table.width());
    }
    Ok(())
}
