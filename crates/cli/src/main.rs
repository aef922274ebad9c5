mod cli;

use crate::cli::{Cli, Command, RequestArgs};
use clap::Parser;
use derive_more::{Display, Error};
use exn::ResultExt;
use imgstore::{Config, DerivativeRequest, Dimensions, Flags, ImageStorage, Meta};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not read {}", _0.display())]
    Input(#[error(not(source))] PathBuf),
    #[display("invalid metadata")]
    Meta,
    #[display("invalid request: {_0}")]
    Request(#[error(not(source))] String),
    #[display("could not write output")]
    Output,
    #[display("storage operation failed")]
    Storage,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

async fn read_meta(source: &str) -> Result<Meta> {
    let json = match source {
        "-" => {
            let mut json = String::new();
            tokio::io::stdin()
                .read_to_string(&mut json)
                .await
                .or_raise(|| ErrorKind::Input(PathBuf::from("<stdin>")))?;
            json
        },
        path => tokio::fs::read_to_string(path).await.or_raise(|| ErrorKind::Input(PathBuf::from(path)))?,
    };
    serde_json::from_str(&json).or_raise(|| ErrorKind::Meta)
}

async fn request(args: &RequestArgs) -> Result<DerivativeRequest> {
    let meta = read_meta(&args.meta).await?;
    let dimensions = args.size.parse::<Dimensions>().or_raise(|| ErrorKind::Request(format!("size `{}`", args.size)))?;
    let flags = args.flags.parse::<Flags>().or_raise(|| ErrorKind::Request(format!("flags `{}`", args.flags)))?;
    Ok(DerivativeRequest::new(meta, dimensions, flags, args.crop))
}

fn print_json(meta: &Meta) -> Result<()> {
    let json = serde_json::to_string_pretty(meta).or_raise(|| ErrorKind::Output)?;
    println!("{json}");
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let storage = ImageStorage::from_config(&config).await.or_raise(|| ErrorKind::Config)?;

    match cli.command {
        Command::Upload { file, code } => {
            let bytes = tokio::fs::read(&file).await.or_raise(|| ErrorKind::Input(file.clone()))?;
            let meta = storage.upload(bytes, code).await.or_raise(|| ErrorKind::Storage)?;
            print_json(&meta)?;
        },
        Command::Link(args) => {
            let locator = storage.link(&request(&args).await?).await.or_raise(|| ErrorKind::Storage)?;
            println!("{locator}");
        },
        Command::Fetch { request: args, output } => {
            let request = request(&args).await?;
            match output {
                Some(path) => {
                    let fetched = storage.fetch(&request).await.or_raise(|| ErrorKind::Storage)?;
                    tokio::fs::write(&path, &fetched.bytes).await.or_raise(|| ErrorKind::Output)?;
                    tracing::info!(path = %path.display(), mime = fetched.mime, "Wrote derivative");
                },
                None => {
                    let mut stdout = tokio::io::stdout();
                    storage.send(&request, &mut stdout).await.or_raise(|| ErrorKind::Storage)?;
                },
            }
        },
        Command::Exists { meta } => {
            let meta = read_meta(&meta).await?;
            let exists = storage.contains(&meta).await.or_raise(|| ErrorKind::Storage)?;
            println!("{exists}");
            if !exists {
                return Ok(ExitCode::FAILURE);
            }
        },
        Command::Remove { meta } => {
            let meta = read_meta(&meta).await?;
            storage.remove(&meta).await.or_raise(|| ErrorKind::Storage)?;
        },
        Command::Rotate { meta, degrees } => {
            let meta = read_meta(&meta).await?;
            let rotated = storage.rotate(&meta, degrees).await.or_raise(|| ErrorKind::Storage)?;
            print_json(&rotated)?;
        },
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}
