//! pag-profile main module.
//!
//! This program analyzes the traces of an instrumented parallel run against
//! the structure of its binary.
//!
//! The `comm` command pairs the per-process MPI-info traces into
//! communication dependency edges. The `analyze` command links the
//! per-function graphs produced by the static analyzer into the program
//! abstraction graph, embeds the PerfData samples, optionally expands the
//! graph per thread, parallel worker or process, and prints a summary of
//! the data lost on the way.

#![forbid(unsafe_code)]
#![deny(warnings)]

mod cli;

use pag_profile::analyze::{self, Inputs, Options, Outputs};
use pag_profile::config::{self, Config};
use pag_profile::error::Result;
use pag_profile::{comm, global};

fn main() {
    init_logger();
    if let Err(err) = execute(cli::application()) {
        eprintln!("Error: {:#}", err);
        std::process::exit(config::FAILURE);
    }
}

/// Initializes the logger.
fn init_logger() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();
}

/// Dispatches CLI commands.
fn execute(app: cli::Application) -> Result<()> {
    global::set_verbose(app.verbose);
    let config = Config::read(&app.config)?;

    match app.cmd {
        cli::Command::Comm {
            logs,
            order,
            output,
        } => {
            let stats = comm::run(
                &logs,
                order.as_ref().map(|p| p.as_ref()), // Option<T> -> Option<&T>
                output.as_ref().map(|p| p.as_ref()), // Option<T> -> Option<&T>
            )?;
            eprintln!("{}", stats);
        }

        cli::Command::Analyze {
            graphs,
            pcg,
            perf,
            comm,
            somap,
            indirect,
            expand,
            processes,
            threads,
            graph_output,
            perf_output,
            diagnostics,
        } => {
            let inputs = Inputs {
                graphs,
                pcg,
                perf,
                comm,
                somap,
                indirect,
            };
            let options = Options {
                expansion: expand.parse()?,
                processes,
                threads,
            };
            let outputs = Outputs {
                graph: graph_output,
                perf: perf_output,
                diagnostics,
            };
            let analysis = analyze::run(&config, &inputs, &options, &outputs)?;
            println!("{}", analysis.diagnostics);
        }
    }

    Ok(())
}
