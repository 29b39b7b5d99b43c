use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use pipegrep::Grep;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pipegrep",
    author,
    version,
    about = "Concurrent line-oriented pattern search",
    after_help = "cat file | pipegrep [flags] REGEX\n\
                  pipegrep [flags] REGEX FILE...\n\n\
                  Note: matched lines are not guaranteed to be in the order\n\
                  in which they appear in the input."
)]
struct Cli {
    /// Number of matcher threads
    #[arg(short = 'j', long = "threads", default_value = "1")]
    threads: usize,

    /// Regular expression to search for
    #[arg(value_name = "REGEX")]
    regex: String,

    /// Files to search; reads stdin when none are given
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,
}

fn file_lines(path: &PathBuf) -> Result<impl Iterator<Item = io::Result<String>> + Send + 'static> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(BufReader::new(file).lines())
}

fn grep_stdin(grep: &Grep) {
    let run = grep.run(BufReader::new(io::stdin()).lines());
    for line in run.matches {
        println!("{line}");
    }
}

fn grep_file(grep: &Grep, path: &PathBuf) -> Result<()> {
    let run = grep.run(file_lines(path)?);
    for line in run.matches {
        println!("{line}");
    }
    Ok(())
}

fn grep_files(grep: &Grep, paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        let name = path.display().to_string();
        let run = grep.run(file_lines(path)?);
        for line in run.matches {
            println!("{}:{line}", name.magenta());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let grep = Grep::new(&cli.regex, cli.threads)?;
    debug!(pattern = grep.pattern(), files = cli.files.len(), "starting");

    match cli.files.as_slice() {
        [] => grep_stdin(&grep),
        [path] => grep_file(&grep, path)?,
        paths => grep_files(&grep, paths)?,
    }
    Ok(())
}
