//! Binary implementing the CLI in `cli.rs`

use std::fmt::Debug;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context as _};
use indicatif::ProgressBar;
use log::{info, warn};
use serde::Serialize;

use ta_rollback::chunks::{self, Unified};
use ta_rollback::pipeline;
use ta_rollback::pki::{self, SignatureScheme};
use ta_rollback::report::{AnalysisReport, Reports, TaReport};
use ta_rollback::{sboot, Config, Parser, VulnerabilityDatabase};

mod cli;
mod logger;

fn main() {
    let args = cli::app().get_matches();
    if let Err(err) = try_main(args) {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn print_as<T: Serialize + Debug>(format: &str, value: &T) -> anyhow::Result<()> {
    match format {
        "alt-native" => println!("{:#?}", value),
        "native" => println!("{:?}", value),
        "json" => println!("{}", serde_json::to_string(value)?),
        "json-pretty" => println!("{}", serde_json::to_string_pretty(value)?),
        "toml" => println!("{}", toml::to_string(value)?),
        "yaml" => println!("{}", serde_yaml::to_string(value)?),
        format => return Err(anyhow!("unknown output format {}", format)),
    }
    Ok(())
}

fn format_of(command: &clap::ArgMatches) -> &str {
    command.get_one::<String>("FORMAT").map(String::as_str).unwrap_or("json-pretty")
}

fn path_of<'a>(command: &'a clap::ArgMatches, name: &str) -> anyhow::Result<&'a Path> {
    command
        .get_one::<String>(name)
        .map(Path::new)
        .ok_or_else(|| anyhow!("missing argument {}", name))
}

fn read(command: &clap::ArgMatches, name: &str) -> anyhow::Result<Vec<u8>> {
    let path = path_of(command, name)?;
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn parser_of(command: &clap::ArgMatches) -> Parser {
    match command.get_one::<u32>("QSEE_OEM_ID") {
        Some(&qsee_oem_id) => Parser { qsee_oem_id },
        None => Parser::default(),
    }
}

fn try_main(args: clap::ArgMatches) -> anyhow::Result<()> {
    logger::Logger::init()?;

    match args.get_count("v") {
        0 => log::set_max_level(log::LevelFilter::Warn),
        1 => log::set_max_level(log::LevelFilter::Info),
        2 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    };

    if let Some(command) = args.subcommand_matches("parse") {
        let path = path_of(command, "FILE")?;
        let parsed = pipeline::parse_file(&parser_of(command), path)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        print_as(format_of(command), &TaReport::new(path, parsed))?;
    }

    if let Some(command) = args.subcommand_matches("scan") {
        let directory = path_of(command, "DIR")?;
        let (parsed, diagnostics) = pipeline::scan_directory(&parser_of(command), directory)?;
        info!("{} TAs, {} unparseable", parsed.len(), diagnostics.len());
        let reports = parsed.into_iter().map(|(path, ta)| TaReport::new(&path, ta)).collect();
        print_as(format_of(command), &Reports { reports, diagnostics })?;
    }

    if let Some(command) = args.subcommand_matches("unify") {
        let chunk_dir = path_of(command, "CHUNK_DIR")?;
        let out_dir = path_of(command, "OUT_DIR")?;
        for unified in chunks::unify_directory(chunk_dir, out_dir)? {
            match unified {
                Unified::Reassembled(path) => println!("reassembled {}", path.display()),
                Unified::Copied(path) => println!("copied {}", path.display()),
                Unified::Skipped(path, error) => warn!("skipped {}: {}", path.display(), error),
            }
        }
    }

    if let Some(command) = args.subcommand_matches("carve") {
        let sboot = path_of(command, "SBOOT")?;
        let out_dir = path_of(command, "OUT_DIR")?;
        let written = sboot::carve_file(sboot, out_dir)?;
        if written.is_empty() {
            warn!("no trustlets found in {}", sboot.display());
        }
        for path in written {
            println!("{}", path.display());
        }
    }

    if let Some(command) = args.subcommand_matches("verify") {
        let message = read(command, "MESSAGE")?;
        let certificate = read(command, "CERTIFICATE")?;
        let signature = read(command, "SIGNATURE")?;
        let schemes = if command.get_flag("EXHAUSTIVE") {
            SignatureScheme::exhaustive()
        } else {
            SignatureScheme::CANONICAL.to_vec()
        };
        match pki::verify_scheme(&message, &certificate, &signature, &schemes) {
            Some(scheme) => println!("verified ({})", scheme),
            None => return Err(anyhow!("signature does not verify")),
        }
    }

    if let Some(command) = args.subcommand_matches("analyze") {
        let config = Config::load(path_of(command, "CONFIG")?)?;
        let database = VulnerabilityDatabase::load(&config.vulnerability_databases)?;
        info!("{} vulnerable TAs known", database.len());

        let progress = if command.get_flag("NO_PROGRESS") {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(config.devices().count() as u64)
        };
        let analysis = pipeline::analyze_dataset(&config, &database, |vendor, device| {
            progress.set_message(format!("{} {}", vendor, device));
            progress.inc(1);
        })?;
        progress.finish_and_clear();

        print_as(format_of(command), &AnalysisReport::new(analysis, command.get_flag("EXPOSURES")))?;
    }

    Ok(())
}
