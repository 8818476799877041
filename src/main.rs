use anyhow::Result;
use clap::Parser;
use esim_mail_triage::cli::{self, Cli, Commands};
use esim_mail_triage::config::Config;
use esim_mail_triage::error::TriageError;
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);

        let usage = e
            .downcast_ref::<TriageError>()
            .map(TriageError::is_usage_error)
            .unwrap_or(false);
        if usage {
            eprintln!("\nList valid selectors with: esim-triage selectors");
            process::exit(2);
        }

        eprintln!("\nFor help, run: esim-triage --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls
    // This is necessary because multiple dependencies use different crypto providers
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("esim_mail_triage=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("esim_mail_triage=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match &cli.command {
        Commands::Classify => {
            tracing::info!("Starting eSIM classifier");
            cli::run_classifier(&cli).await?;
            Ok(())
        }

        Commands::Extract { selector, count } => {
            let report = cli::run_extraction(&cli, selector, *count).await?;

            println!(
                "Extracted {} of {} requested email(s) for '{}'",
                report.written.len(),
                report.requested,
                report.selector
            );
            if !report.failed.is_empty() {
                println!("{} message(s) could not be processed:", report.failed.len());
                for failure in &report.failed {
                    println!("  {}: {}", failure.id, failure.reason);
                }
            }
            if let Some(pid) = report.handoff_pid {
                println!("Hand-off started (pid {})", pid);
            }
            Ok(())
        }

        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");
            let account = cli::authenticate(&cli, *force).await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);
            println!("Connected to account: {}", account);
            Ok(())
        }

        Commands::Selectors => {
            let config = Config::load(&cli.config).await?;
            print!("{}", cli::describe_selectors(&config));
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(TriageError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - classifier.labels: vendor labels and the queries that assign them");
            println!("  - extractor.selectors: vendor keys accepted by `esim-triage extract`");
            println!("  - extractor.handoff_command: program started after each extraction");
            Ok(())
        }
    }
}
