use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use clap::{crate_version, Arg, Command};

use dbxincluder::{process_xml, Session};

#[derive(Debug)]
pub struct Error(String);

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! impl_error_from {
    ($err:ty) => {
        impl From<$err> for Error {
            fn from(e: $err) -> Self {
                Self(format!("{e}"))
            }
        }
    };
}

impl_error_from!(dbxincluder::TransclusionError);

macro_rules! error {
    ($($arg:tt)*) => (Error(std::format!($($arg)*)));
}

enum Input {
    Stdin,
    Named(String),
}

enum Output {
    Stdout,
    Path(PathBuf),
}

struct Processor {
    input: Input,
    output: Output,
    catalog: String,
}

fn build_cli() -> Command {
    Command::new("dbxincluder")
        .version(crate_version!())
        .about("Expand XInclude 1.1 and DocBook transclusions in an XML document")
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .default_value("-")
                .help("Write the result to FILE ('-' for stdout)"),
        )
        .arg(
            Arg::new("catalog")
                .short('c')
                .long("catalog")
                .value_name("CATALOG")
                .default_value("/etc/xml/catalog")
                .help("XML catalog used to map URIs to local resources"),
        )
        .arg(
            Arg::new("INPUT")
                .required(true)
                .help("Input file ('-' for stdin)"),
        )
}

fn parse_args() -> Processor {
    let matches = build_cli().get_matches();

    let input = match matches
        .get_one::<String>("INPUT")
        .expect("INPUT is required")
        .as_str()
    {
        "-" => Input::Stdin,
        path => Input::Named(path.to_string()),
    };

    let output = match matches
        .get_one::<String>("output")
        .expect("already provided default_value")
        .as_str()
    {
        "-" => Output::Stdout,
        path => Output::Path(PathBuf::from(path)),
    };

    let catalog = matches
        .get_one::<String>("catalog")
        .expect("already provided default_value")
        .clone();

    Processor {
        input,
        output,
        catalog,
    }
}

impl Processor {
    fn run(&self) -> Result<(), Error> {
        let (text, base_url, file) = match &self.input {
            Input::Stdin => {
                let mut buffer = String::new();
                io::stdin()
                    .read_to_string(&mut buffer)
                    .map_err(|e| error!("Could not read <stdin>: {e}"))?;
                (buffer, None, "<stdin>".to_string())
            }
            Input::Named(path) => {
                let text = fs::read_to_string(path)
                    .map_err(|e| error!("Could not read {path:?}: {e}"))?;
                (text, Some(path.clone()), path.clone())
            }
        };

        let session = Session::new();
        let result = process_xml(
            &text,
            base_url.as_deref(),
            Some(&file),
            Some(&self.catalog),
            &session,
        )?;

        match &self.output {
            Output::Stdout => io::stdout()
                .write_all(result.as_bytes())
                .map_err(|e| error!("Could not write output: {e}"))?,
            Output::Path(path) => fs::write(path, &result)
                .map_err(|e| error!("Could not write {:?}: {e}", path.display()))?,
        }

        Ok(())
    }
}

fn main() {
    if let Err(e) = parse_args().run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
