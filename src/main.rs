use clap::{ArgAction, Parser};
use ion_pipe::{Executor, Options, StatusPolicy};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::process;

/// Run a pipeline of commands, connecting the output of each to the input of the next.
///
/// Commands are separated by the delimiter token, which must be quoted so that the calling
/// shell does not interpret it: `ion-pipe -- printf 'a\nb\n' '|' grep b`
#[derive(Debug, Parser)]
#[command(name = "ion-pipe", version, long_version = ion_pipe::version())]
struct Args {
    /// Token that separates one command from the next
    #[arg(short, long, default_value = Options::DEFAULT_DELIMITER)]
    delimiter: String,

    /// Print the pipeline to stderr before running it
    #[arg(short = 'x', long)]
    print_commands: bool,

    /// Take the pipeline's status from the last command alone
    #[arg(long)]
    last_status: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// The commands and their arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    tokens: Vec<String>,
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(why) =
        TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)
    {
        eprintln!("ion-pipe: could not initialize logging: {}", why);
    }

    let options = Options {
        delimiter:   args.delimiter,
        policy:      if args.last_status { StatusPolicy::Last } else { StatusPolicy::AllZero },
        print_comms: args.print_commands,
    };

    let report = Executor::new(options).run(&args.tokens);
    for warning in report.warnings() {
        eprintln!("ion-pipe: warning: {}", warning);
    }
    for failure in report.failures() {
        eprintln!("ion-pipe: {}", failure);
    }
    process::exit(report.status().as_os_code());
}
