//! Punto de entrada ("driver").
//!
//! Este módulo orquesta la compilación de una o más unidades y
//! expone una CLI.

use anyhow::{self, bail, Context};
use clap::{self, crate_version, Arg, Command};
use ifpscc::unit::{self, OutputFormat, UnitError};
use tracing_subscriber::EnvFilter;

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    thread,
};

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = Command::new("ifpscc")
        .version(crate_version!())
        .about("Compiles a C dialect into stack VM bytecode")
        .arg(
            Arg::new("disassemble")
                .short('A')
                .long("disassemble")
                .help("Emit a disassembly listing instead of a binary"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .value_name("FILE")
                .help("Output file ('-' along with -A for stdout)"),
        )
        .arg(
            Arg::new("entry")
                .long("entry")
                .takes_value(true)
                .value_name("NAME")
                .default_value("InitializeUninstall")
                .help("Function to mark as entry point"),
        )
        .arg(
            Arg::new("input")
                .value_name("FILE")
                .required(true)
                .multiple_values(true)
                .help("Source files"),
        )
        .get_matches();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    // Se extraen argumentos necesarios
    let format = if args.is_present("disassemble") {
        OutputFormat::Disassembly
    } else {
        OutputFormat::Binary
    };

    let options = unit::Options {
        entry: args.value_of("entry").unwrap_or_default().to_owned(),
        format,
        ..Default::default()
    };

    let inputs: Vec<PathBuf> = args
        .values_of("input")
        .context("No input files")?
        .map(PathBuf::from)
        .collect();

    match (format, args.value_of("output")) {
        // Salida a stdout
        (OutputFormat::Disassembly, Some("-")) => {
            if inputs.len() > 1 {
                bail!("Refusing to write several listings to stdout");
            }

            let listing = unit::compile_unit(&inputs[0], &options).map_err(report)?;
            io::stdout()
                .write_all(&listing)
                .context("Failed to write listing to stdout")?;
        }

        (OutputFormat::Binary, Some("-")) => bail!("Refusing to write bytecode to stdout"),

        // Salida a un archivo explícito
        (_, Some(path)) => {
            if inputs.len() > 1 {
                bail!("-o cannot be used with several input files");
            }

            unit::compile_file(&inputs[0], Path::new(path), &options).map_err(report)?;
        }

        // Una salida por entrada, compiladas en paralelo
        (_, None) => {
            let extension = match format {
                OutputFormat::Binary => "bin",
                OutputFormat::Disassembly => "asm",
            };

            let results: Vec<_> = thread::scope(|scope| {
                let handles: Vec<_> = inputs
                    .iter()
                    .map(|input| {
                        let options = &options;
                        scope.spawn(move || {
                            unit::compile_file(input, &input.with_extension(extension), options)
                        })
                    })
                    .collect();

                handles.into_iter().map(|handle| handle.join()).collect()
            });

            let mut failed = 0;
            for (input, result) in inputs.iter().zip(results) {
                match result {
                    Ok(Ok(_)) => (),
                    Ok(Err(error)) => {
                        eprintln!("{:#}", report(error));
                        failed += 1;
                    }

                    Err(_) => bail!("Compiler thread panicked on {}", input.display()),
                }
            }

            if failed > 0 {
                bail!("{} of {} units failed", failed, inputs.len());
            }
        }
    };

    Ok(())
}

/// Imprime diagnósticos de compilación y los convierte en error final.
fn report(error: UnitError) -> anyhow::Error {
    match error {
        UnitError::Compile { kind, rendered } => {
            eprint!("{}", rendered);
            anyhow::anyhow!("Compilation failed ({})", kind)
        }

        other => anyhow::Error::new(other),
    }
}
