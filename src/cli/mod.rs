//! CLI command handling
//!
//! Loads test cases, runs them and formats the results.

use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::{Config, MessagingBackend};
use crate::common::{paths, Error, Result};
use crate::context::{Context, LogLevel};
use crate::services::Services;
use crate::testing::{RunStatus, TestCase, TestReport, TestRunner};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            paths,
            verbose,
            config,
            ..
        } => {
            let config = load_config(config.as_deref())?;
            let services = Services::from_config(&config)?;
            run_cases(&paths, &services, verbose).await
        }

        Commands::Validate { paths, config } => {
            let config = load_config(config.as_deref())?;
            let services = Services::from_config(&config)?;
            validate_cases(&paths, &services)
        }

        Commands::Check { config } => {
            let path = config.clone().or_else(paths::config_path);
            let config = load_config(config.as_deref())?;
            print_config(path.as_deref(), &config);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

async fn run_cases(paths: &[PathBuf], services: &Services, verbose: bool) -> Result<()> {
    let runner = TestRunner::new().echo(true);
    let mut failed = 0;

    for path in paths {
        let case = match TestCase::load(path, services) {
            Ok(case) => case,
            Err(e) => {
                println!(
                    "\n{} {}: {}",
                    "✗".red(),
                    path.display().to_string().white().bold(),
                    e
                );
                failed += 1;
                continue;
            }
        };

        let report = runner.run(&case).await;
        print_report(&report, verbose);
        if !report.passed() {
            failed += 1;
        }
    }

    println!();
    if failed == 0 {
        println!(
            "{} {} test case(s) passed",
            "✓".green().bold(),
            paths.len()
        );
        Ok(())
    } else {
        Err(Error::TestAssertion(format!(
            "{} of {} test case(s) failed",
            failed,
            paths.len()
        )))
    }
}

fn print_report(report: &TestReport, verbose: bool) {
    if verbose && !report.log.is_empty() {
        println!("\n{}", "Log:".cyan());
        for entry in &report.log {
            let line = format!(
                "  [{:>8.3}s] {}",
                entry.elapsed.as_secs_f64(),
                entry.message
            );
            match entry.level {
                LogLevel::Info => println!("{}", line.dimmed()),
                LogLevel::Error => println!("{}", line.red()),
            }
        }
    }

    let counts = format!(
        "({}/{} steps, {:.2}s)",
        report.steps_run(),
        report.steps_total(),
        report.duration.as_secs_f64()
    );
    match report.status {
        RunStatus::Passed => println!(
            "\n{} {} {}",
            "PASSED".green().bold(),
            report.name,
            counts.dimmed()
        ),
        RunStatus::Failed => {
            println!(
                "\n{} {} {}",
                "FAILED".red().bold(),
                report.name,
                counts.dimmed()
            );
            if let Some(failure) = &report.failure {
                println!("  {}", failure);
            }
        }
        RunStatus::LeakedResources => {
            println!(
                "\n{} {} {}",
                "LEAKED".yellow().bold(),
                report.name,
                counts.dimmed()
            );
            for failure in &report.release_failures {
                println!("  {}", failure);
            }
        }
    }
}

fn validate_cases(paths: &[PathBuf], services: &Services) -> Result<()> {
    let mut invalid = 0;

    for path in paths {
        let case = match TestCase::load(path, services) {
            Ok(case) => case,
            Err(e) => {
                println!("{} {}: {}", "✗".red(), path.display(), e);
                invalid += 1;
                continue;
            }
        };

        let failures = case.validate(&Context::new());
        if failures.is_empty() {
            println!(
                "{} {} ({} steps)",
                "✓".green(),
                path.display(),
                case.step_count()
            );
        } else {
            println!("{} {}", "✗".red(), path.display());
            for failure in &failures {
                println!("    {}", failure);
            }
            invalid += 1;
        }
    }

    if invalid == 0 {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "{} of {} test case(s) are invalid",
            invalid,
            paths.len()
        )))
    }
}

fn print_config(path: Option<&Path>, config: &Config) {
    println!("{}", "Configuration:".cyan());
    match path {
        Some(path) if path.exists() => println!("  file:              {}", path.display()),
        Some(path) => println!(
            "  file:              {} {}",
            path.display(),
            "(not found, using defaults)".dimmed()
        ),
        None => println!("  file:              {}", "(none, using defaults)".dimmed()),
    }

    let backend = match config.messaging.backend {
        MessagingBackend::Memory => "memory",
        MessagingBackend::Redis => "redis",
    };
    println!("  messaging:         {}", backend);
    if config.messaging.backend == MessagingBackend::Redis {
        println!("  redis url:         {}", config.messaging.redis_url);
    }
    println!("  dequeue timeout:   {}s", config.timeouts.dequeue_secs);
    println!("  subscribe timeout: {}s", config.timeouts.subscribe_secs);
    println!("  process grace:     {}ms", config.timeouts.process_grace_millis);

    if let Some(dir) = paths::log_dir() {
        println!("  log directory:     {}", dir.display());
    }
}
