use clap::{self, crate_authors, crate_version, Arg, ArgAction, Command};

const ABOUT: &str = "
ta-rollback checks whether TEE trusted applications in extracted firmware
are protected against rollback to known vulnerable versions.

Use -h for short descriptions and --help for more details
";

pub const FORMATS: [&str; 6] = ["json", "json-pretty", "yaml", "toml", "native", "alt-native"];

fn format_arg() -> Arg {
    Arg::new("FORMAT")
        .short('f')
        .long("format")
        .help("output format")
        .value_parser(FORMATS)
        .default_value("json-pretty")
}

pub fn app() -> Command {
    // clap wants a &'static str for the long version
    lazy_static::lazy_static! {
        static ref LONG_VERSION: String = long_version(None);
    }

    Command::new("ta-rollback")
        .author(crate_authors!())
        .version(crate_version!())
        .long_version(LONG_VERSION.as_str())
        .about(ABOUT)
        .subcommand_required(true)
        .arg_required_else_help(true)

        .arg(Arg::new("v")
             .short('v')
             .long("verbose")
             .action(ArgAction::Count)
             .global(true)
             .help("Sets the level of verbosity (use multiple times to increase: -v = INFO, -vv = DEBUG, -vvv = TRACE)")
        )

        .arg(Arg::new("QSEE_OEM_ID")
             .long("qsee-oem-id")
             .help("OEM id a QSEE secboot metadata block must carry")
             .long_help("OEM id a QSEE secboot metadata block must carry. \
                         Ignored by `analyze`, which takes it from the configuration file.")
             .value_parser(clap::value_parser!(u32))
             .global(true)
        )

        .subcommand(Command::new("parse")
            .about("parses a single trusted application")
            .arg(Arg::new("FILE")
                 .help("TA to parse; a QSEE .mdt is reassembled from the fragments next to it")
                 .required(true))
            .arg(format_arg())
        )

        .subcommand(Command::new("scan")
            .about("parses every trusted application below a directory")
            .arg(Arg::new("DIR")
                 .help("directory to walk")
                 .required(true))
            .arg(format_arg())
        )

        .subcommand(Command::new("unify")
            .about("reassembles split QSEE images (.mdt + .bNN) into whole ELF files")
            .arg(Arg::new("CHUNK_DIR")
                 .help("directory containing the .mdt/.bNN fragments")
                 .required(true))
            .arg(Arg::new("OUT_DIR")
                 .help("directory to write <name>.elf files to")
                 .required(true))
        )

        .subcommand(Command::new("carve")
            .about("extracts Kinibi trustlets embedded in a Samsung sboot image")
            .arg(Arg::new("SBOOT")
                 .help("sboot image")
                 .required(true))
            .arg(Arg::new("OUT_DIR")
                 .help("directory to write <uuid>.tlbin files to")
                 .required(true))
        )

        .subcommand(Command::new("verify")
            .about("verifies an RSA signature against a certificate")
            .arg(Arg::new("MESSAGE")
                 .long("message")
                 .help("signed data")
                 .required(true))
            .arg(Arg::new("CERTIFICATE")
                 .long("certificate")
                 .help("X.509 certificate (DER or PEM) or RSA public key")
                 .required(true))
            .arg(Arg::new("SIGNATURE")
                 .long("signature")
                 .help("raw signature")
                 .required(true))
            .arg(Arg::new("EXHAUSTIVE")
                 .long("exhaustive")
                 .action(ArgAction::SetTrue)
                 .help("try SHA-224/256/384/512 with both paddings instead of SHA-256 only"))
        )

        .subcommand(Command::new("analyze")
            .about("analyzes rollback exposure of a whole firmware dataset")
            .arg(Arg::new("CONFIG")
                 .help("dataset configuration (TOML)")
                 .required(true))
            .arg(Arg::new("EXPOSURES")
                 .long("exposures")
                 .action(ArgAction::SetTrue)
                 .help("list every analyzed history, not just the statistics"))
            .arg(Arg::new("NO_PROGRESS")
                 .long("no-progress")
                 .action(ArgAction::SetTrue)
                 .help("do not draw a progress bar"))
            .arg(format_arg())
        )
}

/// Return the "long" format of ta-rollback's version string.
///
/// If a revision hash is given, then it is used. If one isn't given, then
/// the TA_ROLLBACK_BUILD_GIT_HASH env var is inspected for it. If that isn't
/// set, then a revision hash is not included in the version string returned.
pub fn long_version(revision_hash: Option<&str>) -> String {
    let hash = match revision_hash.or(option_env!("TA_ROLLBACK_BUILD_GIT_HASH")) {
        None => String::new(),
        Some(githash) => format!(" (rev {})", githash),
    };
    format!("{}{}", crate_version!(), hash)
}
