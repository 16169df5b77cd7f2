use clap::{App, AppSettings, Arg, SubCommand};
use log::LevelFilter;
use num_enum::TryFromPrimitive;
use std::convert::TryFrom;

mod command_keygen;
mod command_simulate;
mod command_verify;

#[derive(TryFromPrimitive, PartialEq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum Verbosity {
    Warn = 0,
    Info = 1,
    Debug = 2,
    Trace = 3,
}

impl Verbosity {
    fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Warn => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
            Verbosity::Trace => LevelFilter::Trace,
        }
    }
}

fn main() {
    let matches = App::new("BallotChain CLI")
        .version("0.1")
        .about("Runs and audits elections recorded on a hash-chained bulletin board")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            SubCommand::with_name("keygen")
                .about("Generate an election authority keypair and voter identity key, or a trustee secret")
                .arg(
                    Arg::with_name("trustee")
                        .long("trustee")
                        .takes_value(true)
                        .value_name("NAME")
                        .requires("secret")
                        .help("Generate a trustee with this name and print its public descriptor"),
                )
                .arg(
                    Arg::with_name("secret")
                        .long("secret")
                        .takes_value(true)
                        .help("File to write the trustee secret to"),
                ),
        )
        .subcommand(
            SubCommand::with_name("simulate")
                .about("Run a complete election against an in-memory bulletin board")
                .arg(
                    Arg::with_name("scheme")
                        .long("scheme")
                        .takes_value(true)
                        .possible_values(&["dummy", "elgamal"])
                        .default_value("elgamal"),
                )
                .arg(
                    Arg::with_name("trustees")
                        .long("trustees")
                        .short("n")
                        .takes_value(true)
                        .default_value("3"),
                )
                .arg(
                    Arg::with_name("threshold")
                        .long("threshold")
                        .short("t")
                        .takes_value(true)
                        .default_value("2"),
                )
                .arg(
                    Arg::with_name("voters")
                        .long("voters")
                        .takes_value(true)
                        .default_value("20"),
                )
                .arg(
                    Arg::with_name("options")
                        .long("options")
                        .takes_value(true)
                        .default_value("yes,no,abstain")
                        .help("Comma separated ballot options"),
                )
                .arg(
                    Arg::with_name("max-selections")
                        .long("max-selections")
                        .takes_value(true)
                        .default_value("1"),
                )
                .arg(
                    Arg::with_name("misdirect")
                        .long("misdirect")
                        .takes_value(true)
                        .help("Comma separated trustee indices that deal bad key shares"),
                )
                .arg(
                    Arg::with_name("bad-share")
                        .long("bad-share")
                        .takes_value(true)
                        .help("Comma separated trustee indices that publish bad decryption shares"),
                )
                .arg(
                    Arg::with_name("OUTPUT")
                        .index(1)
                        .required(false)
                        .help("File to write the audit trail to, as JSON"),
                ),
        )
        .subcommand(
            SubCommand::with_name("verify")
                .about("Independently audit an election's bulletin board entries")
                .arg(
                    Arg::with_name("INPUT")
                        .index(1)
                        .required(true)
                        .help("Audit trail in JSON or CBOR format"),
                ),
        )
        .get_matches();

    let verbosity = Verbosity::try_from(matches.occurrences_of("v").min(3) as u8)
        .unwrap_or(Verbosity::Trace);
    init_logging(verbosity);

    match matches.subcommand() {
        ("keygen", Some(matches)) => command_keygen::command_keygen(matches),
        ("simulate", Some(matches)) => command_simulate::command_simulate(matches),
        ("verify", Some(matches)) => command_verify::command_verify(matches),
        _ => unreachable!(),
    }
}

fn init_logging(verbosity: Verbosity) {
    use log4rs::append::console::{ConsoleAppender, Target};
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S%.3f)} {h({l:<5})} {t} - {m}{n}",
        )))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(
            Root::builder()
                .appender("stderr")
                .build(verbosity.level_filter()),
        );

    let result = config
        .map_err(|e| e.to_string())
        .and_then(|config| log4rs::init_config(config).map(|_| ()).map_err(|e| e.to_string()));
    if let Err(e) = result {
        eprintln!("ballotchain: unable to initialise logging: {}", e);
    }
}

/// Expand `~` and environment variables in a path argument
pub fn expand(input: &str) -> String {
    shellexpand::full(input)
        .map(|expanded| expanded.into_owned())
        .unwrap_or_else(|_| input.to_owned())
}

/// Parse a numeric argument or exit with a message
pub fn parse_arg<T: std::str::FromStr>(matches: &clap::ArgMatches, name: &str) -> T {
    let value = matches.value_of(name).unwrap_or_default();
    value.parse().unwrap_or_else(|_| {
        eprintln!("ballotchain: invalid value for --{}: {}", name, value);
        std::process::exit(1);
    })
}

/// Parse a comma separated list of trustee indices
pub fn parse_indices(matches: &clap::ArgMatches, name: &str) -> Vec<u32> {
    match matches.value_of(name) {
        None => vec![],
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse().unwrap_or_else(|_| {
                    eprintln!("ballotchain: invalid trustee index in --{}: {}", name, s);
                    std::process::exit(1);
                })
            })
            .collect(),
    }
}
