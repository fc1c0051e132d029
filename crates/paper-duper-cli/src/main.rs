mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, ScanArgs};
use dotenv::dotenv;
use paper_duper_core::actions::{self, DeleteMode};
use paper_duper_core::{
    AppConfig, CacheStats, DuplicateGroup, Error, HashCache, ScanEngine, ScanReport,
    SignatureBuilder,
};
use progress::CliReporter;
use tracing::{info, warn};

fn main() -> Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = paper_duper_core::config::load_configuration()
        .context("Error loading configuration")?;

    let args = Cli::parse();

    match args.command {
        Some(Commands::Scan(scan_args)) => run_scan(config, scan_args)?,
        Some(Commands::CacheStats) => {
            let cache = open_cache(&config);
            print_cache_stats(&cache.stats());
        }
        Some(Commands::CacheClear) => {
            if prompt_confirm(
                "Are you SURE you want to delete every hash cache entry?",
                Some(false),
            )? {
                let removed = open_cache(&config).clear_all();
                println!("Removed {} cache entries", removed);
            }
        }
        Some(Commands::CacheCleanup) => {
            let removed = open_cache(&config).cleanup();
            println!("Removed {} expired or excess cache entries", removed);
        }
        Some(Commands::PrintConfig) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn open_cache(config: &AppConfig) -> HashCache {
    let builder = SignatureBuilder::with_default_backend(config.signature.clone());
    HashCache::open(config.cache.clone(), builder)
}

fn apply_scan_args(config: &mut AppConfig, args: &ScanArgs) {
    let scan = &mut config.scan;
    scan.root = args.dir.clone();
    scan.recursive = !args.no_recursive;
    if let Some(threshold) = args.threshold {
        scan.threshold = threshold;
    }
    if args.min_size.is_some() {
        scan.filter.min_size = args.min_size;
    }
    if args.max_size.is_some() {
        scan.filter.max_size = args.max_size;
    }
    if args.after.is_some() {
        scan.filter.modified_after = args.after;
    }
    if args.before.is_some() {
        scan.filter.modified_before = args.before;
    }
    if args.name.is_some() {
        scan.filter.name_pattern = args.name.clone();
    }
    if args.no_text {
        scan.enable_text_compare = false;
        config.signature.enable_text = false;
    }
    if args.no_cache {
        config.cache.enable_hash_cache = false;
    }
}

fn run_scan(mut config: AppConfig, args: ScanArgs) -> Result<()> {
    apply_scan_args(&mut config, &args);

    let cache = Arc::new(open_cache(&config));
    let engine = ScanEngine::new(config.scan.clone(), Arc::clone(&cache));
    let reporter = CliReporter::new();

    let outcome = engine.scan(&reporter);
    reporter.finish();

    let report = match outcome {
        Ok(report) => report,
        Err(Error::Cancelled) => {
            warn!("Scan cancelled, no results");
            return Ok(());
        }
        Err(e) => return Err(e).context("Scan failed"),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_groups(&report.groups);
        print_summary(&report);
    }

    if args.delete {
        run_delete(&report, &cache, &args)?;
    }

    Ok(())
}

fn run_delete(report: &ScanReport, cache: &HashCache, args: &ScanArgs) -> Result<()> {
    let plan = actions::retention_plan(&report.groups);
    if plan.is_empty() {
        println!("Nothing to delete");
        return Ok(());
    }

    let mode = if args.permanent {
        DeleteMode::Permanent
    } else {
        DeleteMode::Trash
    };
    let verb = match mode {
        DeleteMode::Permanent => "PERMANENTLY delete",
        DeleteMode::Trash => "move to the trash",
    };

    if !args.yes
        && !prompt_confirm(
            &format!("{} {} duplicate files?", verb, plan.len()),
            Some(false),
        )?
    {
        return Ok(());
    }

    let deletion = actions::delete_files(&plan, mode, Some(cache));
    info!(
        "{} removed, {} already missing, {} failed",
        format!("{}", deletion.deleted.len()).green(),
        format!("{}", deletion.missing.len()).yellow(),
        format!("{}", deletion.failed.len()).red(),
    );
    for (path, reason) in &deletion.failed {
        eprintln!("  {} {}: {}", "✗".red(), path.display(), reason);
    }

    if !deletion.is_clean() {
        anyhow::bail!("{} files could not be removed", deletion.failed.len());
    }
    Ok(())
}

fn print_groups(groups: &[DuplicateGroup]) {
    for (i, group) in groups.iter().enumerate() {
        println!();
        println!(
            "{} {} ({}, similarity {:.2})",
            "Group".bold(),
            (i + 1).to_string().bold(),
            group.method.to_string().cyan(),
            group.similarity,
        );
        for (j, member) in group.members.iter().enumerate() {
            let label = if j == 0 { "keep".green() } else { "dup ".red() };
            println!(
                "  {} {} ({}, {} pages, {})",
                label,
                member.path.display(),
                human_bytes(member.size_bytes),
                member.page_count,
                member.modified_at().format("%Y-%m-%d %H:%M"),
            );
        }
    }
    println!();
}

fn print_summary(report: &ScanReport) {
    info!(
        "Scan: {}, Signatures: {}, Grouping: {}",
        format!("{:.2}s", report.scan_duration.as_secs_f64()).green(),
        format!("{:.2}s", report.signature_duration.as_secs_f64()).green(),
        format!("{:.2}s", report.grouping_duration.as_secs_f64()).green(),
    );
    info!(
        "{} PDFs found, {} processed ({} from cache), {} failed",
        format!("{}", report.files_found).cyan(),
        format!("{}", report.files_processed).cyan(),
        format!("{}", report.cache_hits).cyan(),
        format!("{}", report.files_failed).yellow(),
    );
    info!(
        "{} duplicate groups, {} duplicate files, {} wasted",
        format!("{}", report.groups.len()).red(),
        format!("{}", report.duplicate_files()).red(),
        human_bytes(report.wasted_bytes).red(),
    );
}

fn print_cache_stats(stats: &CacheStats) {
    println!("{}", "Hash cache".bold());
    println!("  Directory:          {}", stats.cache_dir.display());
    println!(
        "  Status:             {}",
        match (stats.enabled, stats.degraded) {
            (false, _) => "disabled".yellow(),
            (true, true) => "unavailable".red(),
            (true, false) => "enabled".green(),
        }
    );
    println!(
        "  Entries:            {} ({} not expired, cap {})",
        stats.persistent_entries, stats.valid_entries, stats.max_cache_size
    );
    println!(
        "  In memory:          {} (cap {})",
        stats.memory_entries, stats.memory_cache_size
    );
    println!("  Total accesses:     {}", stats.total_accesses);
    println!("  TTL:                {} days", stats.cache_ttl_days);
    println!("  Size on disk:       {}", human_bytes(stats.cache_size_bytes));
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(default.unwrap_or(false));
        }

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
