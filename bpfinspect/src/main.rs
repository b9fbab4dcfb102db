mod commands;
mod config;
mod error;
mod harness;
mod hex;
mod inspect;
mod output;
mod selector;

use std::path::PathBuf;
use std::process;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};

use commands::fixture::FixtureArgs;
use error::{exit_code, InspectError};
use inspect::map::KernelMaps;
use inspect::prog::KernelPrograms;
use output::{Format, Formatter};

#[derive(Parser)]
#[command(
    name = "bpfinspect",
    about = "Inspect eBPF programs and maps loaded in the kernel"
)]
struct Cli {
    /// Print version information, same as the `version` command
    #[arg(short = 'V', long)]
    version: bool,

    /// Output in JSON format
    #[arg(short = 'j', long, global = true)]
    json: bool,

    /// Output in pretty-printed JSON format
    #[arg(short = 'p', long, global = true)]
    pretty: bool,

    /// Mount point of the BPF filesystem
    #[arg(long, global = true, value_name = "DIR")]
    bpffs: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect loaded eBPF programs
    #[command(subcommand)]
    Prog(ProgCommand),

    /// Inspect and read eBPF maps
    #[command(subcommand)]
    Map(MapCommand),

    /// Load the counter fixture and verify it against real traffic
    #[command(subcommand)]
    Fixture(FixtureCommand),

    /// Display version information
    Version,
}

#[derive(Subcommand)]
enum ProgCommand {
    /// Show loaded programs: [id N | tag T | name N | pinned P]
    #[command(visible_alias = "list")]
    Show {
        #[arg(value_name = "PROG")]
        args: Vec<String>,
    },
}

#[derive(Subcommand)]
enum MapCommand {
    /// Show loaded maps: [id N | name N | pinned P]
    #[command(visible_alias = "list")]
    Show {
        #[arg(value_name = "MAP")]
        args: Vec<String>,
    },

    /// Dump all entries in a map: MAP
    Dump {
        #[arg(value_name = "MAP", required = true)]
        args: Vec<String>,
    },

    /// Look up a key in a map: MAP key XX XX ...
    Lookup {
        #[arg(value_name = "MAP", required = true)]
        args: Vec<String>,
    },

    /// Get the key after KEY, or the first key: MAP [key XX XX ...]
    Getnext {
        #[arg(value_name = "MAP", required = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand)]
enum FixtureCommand {
    /// Load, attach, send packets and check the counter
    Run(FixtureArgs),
}

impl Cli {
    /// `--pretty` wins over `--json`; with neither, the config file decides.
    fn format(&self, configured: Format) -> Format {
        if self.pretty {
            Format::Pretty
        } else if self.json {
            Format::Json
        } else {
            configured
        }
    }
}

/// Help and version requests succeed; every other parse error is a failure.
fn parse_exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

fn init_logging(verbose: bool) {
    env_logger::Builder::new()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .parse_default_env()
        .init();
}

/// Writes an inspection result the way the selected format expects.
fn emit(formatter: &dyn Formatter, format: Format, result: Result<String, InspectError>) -> i32 {
    let code = exit_code(&result);
    match result {
        Ok(out) if out.is_empty() => {}
        Ok(out) => println!("{out}"),
        Err(e) if format == Format::Plain => eprintln!("{}", e.describe()),
        Err(e) => println!("{}", formatter.error(&e)),
    }
    code
}

fn main() {
    let cli = Cli::try_parse().unwrap_or_else(|err| {
        let _ = err.print();
        process::exit(parse_exit_code(&err));
    });
    init_logging(cli.verbose);

    let command = match &cli.command {
        _ if cli.version => {
            println!("{}", commands::version::version());
            process::exit(0);
        }
        Some(command) => command,
        None => {
            let _ = Cli::command().print_help();
            process::exit(1);
        }
    };

    let config = config::Config::load().unwrap_or_else(|e| {
        log::warn!("ignoring config: {e:#}");
        config::Config::default()
    });
    let format = cli.format(config.general.format);
    let formatter = output::new_formatter(format);
    let bpffs = cli
        .bpffs
        .clone()
        .unwrap_or_else(|| config.general.bpffs_root.clone());

    let code = match command {
        Command::Prog(ProgCommand::Show { args }) => {
            let programs = KernelPrograms::new(&bpffs);
            emit(&*formatter, format, commands::prog::show(&programs, &*formatter, args))
        }
        Command::Map(command) => {
            let maps = KernelMaps::new(&bpffs);
            let result = match command {
                MapCommand::Show { args } => commands::map::show(&maps, &*formatter, args),
                MapCommand::Dump { args } => commands::map::dump(&maps, &*formatter, args),
                MapCommand::Lookup { args } => commands::map::lookup(&maps, &*formatter, args),
                MapCommand::Getnext { args } => commands::map::getnext(&maps, &*formatter, args),
            };
            emit(&*formatter, format, result)
        }
        Command::Fixture(FixtureCommand::Run(args)) => {
            let opts = args.options(&config.fixture);
            let result = commands::fixture::run(&opts, std::io::stdout().lock());
            if let Err(e) = &result {
                eprintln!("Error: {e:#}");
            }
            exit_code(&result)
        }
        Command::Version => {
            println!("{}", commands::version::version());
            0
        }
    };
    process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("bpfinspect").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_anywhere() {
        let cli = parse(&["prog", "show", "-j"]);
        assert_eq!(cli.format(Format::Plain), Format::Json);
        let cli = parse(&["-p", "map", "list"]);
        assert_eq!(cli.format(Format::Plain), Format::Pretty);
        let cli = parse(&["-j", "--pretty", "version"]);
        assert_eq!(cli.format(Format::Plain), Format::Pretty);
        let cli = parse(&["version"]);
        assert_eq!(cli.format(Format::Json), Format::Json);
    }

    #[test]
    fn selector_words_pass_through() {
        let cli = parse(&["--bpffs", "/tmp/bpf", "map", "lookup", "id", "3", "key", "0a", "0b"]);
        assert_eq!(cli.bpffs, Some(PathBuf::from("/tmp/bpf")));
        match cli.command {
            Some(Command::Map(MapCommand::Lookup { args })) => {
                assert_eq!(args, ["id", "3", "key", "0a", "0b"]);
            }
            _ => panic!("expected map lookup"),
        }
        assert!(matches!(
            parse(&["prog", "list"]).command,
            Some(Command::Prog(ProgCommand::Show { .. }))
        ));
    }

    fn exit_code_for(args: &[&str]) -> i32 {
        let err = Cli::try_parse_from(std::iter::once("bpfinspect").chain(args.iter().copied()))
            .err()
            .expect("parse should stop early");
        parse_exit_code(&err)
    }

    #[test]
    fn usage_errors_exit_with_one() {
        assert_eq!(exit_code_for(&["map", "dump"]), 1);
        assert_eq!(exit_code_for(&["frobnicate"]), 1);
        assert_eq!(exit_code_for(&["prog", "--bogus"]), 1);
        assert_eq!(exit_code_for(&["prog"]), 1);
        assert_eq!(exit_code_for(&["--help"]), 0);
        assert_eq!(exit_code_for(&["map", "--help"]), 0);
    }

    #[test]
    fn version_flag_matches_version_command() {
        let cli = parse(&["--version"]);
        assert!(cli.version);
        assert!(cli.command.is_none());
        assert!(parse(&["-V"]).version);
        assert!(!parse(&["version"]).version);
        assert!(commands::version::version().starts_with("bpfinspect version "));

        let bare = parse(&[]);
        assert!(!bare.version && bare.command.is_none());
    }

    #[test]
    fn fixture_flags() {
        match parse(&["fixture", "run", "--packets", "1000", "--concurrency", "64", "--drv", "--netns"]).command {
            Some(Command::Fixture(FixtureCommand::Run(args))) => {
                assert_eq!(args.packets, Some(1000));
                assert_eq!(args.concurrency, Some(64));
                assert!(args.drv);
                assert!(args.netns);
            }
            _ => panic!("expected fixture run"),
        }
    }
}
