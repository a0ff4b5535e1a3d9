//! pag-profile options parser.

use pag_profile::config;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(about = "Offline performance analysis of parallel programs")]
pub struct Application {
    #[structopt(
        parse(from_os_str),
        short,
        long,
        default_value = &config::DEFAULT_CONFIG,
        help = "Path to the config file"
    )]
    pub config: PathBuf,

    #[structopt(short, long, help = "Log pipeline stages")]
    pub verbose: bool,

    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(StructOpt)]
pub enum Command {
    #[structopt(about = "Matches MPI traces into communication dependency edges")]
    Comm {
        #[structopt(
            parse(from_os_str),
            required = true,
            help = "Paths to the MPI-info traces, one per process"
        )]
        logs: Vec<PathBuf>,

        #[structopt(
            parse(from_os_str),
            long,
            help = "Optional path to the interleaving trace (buffered matching otherwise)"
        )]
        order: Option<PathBuf>,

        #[structopt(
            parse(from_os_str),
            short,
            long,
            help = "Optional path to generated file (STDOUT otherwise)"
        )]
        output: Option<PathBuf>,
    },

    #[structopt(about = "Links, embeds and expands the program abstraction graph")]
    Analyze {
        #[structopt(
            parse(from_os_str),
            short,
            long,
            help = "Path to the directory of per-function graphs"
        )]
        graphs: PathBuf,

        #[structopt(parse(from_os_str), long, help = "Path to the program call graph")]
        pcg: PathBuf,

        #[structopt(parse(from_os_str), short, long, help = "Optional path to the PerfData trace")]
        perf: Option<PathBuf>,

        #[structopt(
            parse(from_os_str),
            long,
            help = "Optional path to the communication dependency edges"
        )]
        comm: Option<PathBuf>,

        #[structopt(parse(from_os_str), long, help = "Optional path to the shared object map")]
        somap: Option<PathBuf>,

        #[structopt(parse(from_os_str), long, help = "Optional path to the indirect call trace")]
        indirect: Option<PathBuf>,

        #[structopt(
            short,
            long,
            possible_values(&config::EXPANSIONS),
            default_value = &config::DEFAULT_EXPANSION,
            help = "Expansion of the program abstraction graph"
        )]
        expand: String,

        #[structopt(long, help = "Number of processes (derived from the data otherwise)")]
        processes: Option<usize>,

        #[structopt(long, help = "Number of parallel workers (derived from the data otherwise)")]
        threads: Option<usize>,

        #[structopt(parse(from_os_str), long, help = "Optional path to the resulting graph")]
        graph_output: Option<PathBuf>,

        #[structopt(
            parse(from_os_str),
            long,
            help = "Optional path to the resulting performance data (JSON)"
        )]
        perf_output: Option<PathBuf>,

        #[structopt(parse(from_os_str), long, help = "Optional path to the diagnostics (JSON)")]
        diagnostics: Option<PathBuf>,
    },
}

/// Constructs an instance of the Application.
pub fn application() -> Application {
    Application::from_args()
}
