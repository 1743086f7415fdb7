//! parcel: multipart uploads into a local object store

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

fn cli() -> Command {
    let store_dir = Arg::new("store-dir")
        .long("store-dir")
        .value_name("DIR")
        .help("Object store directory")
        .value_parser(value_parser!(PathBuf))
        .default_value("./parcel-data");
    let bucket = Arg::new("bucket")
        .long("bucket")
        .value_name("BUCKET")
        .help("Destination bucket");
    let key = Arg::new("key")
        .long("key")
        .value_name("KEY")
        .help("Object key");

    Command::new("parcel")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Concurrent multipart uploads with per-part retry")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("Log output format")
                .value_parser(["text", "json"])
                .default_value("text")
                .global(true),
        )
        .subcommand(
            Command::new("upload")
                .about("Upload a file as a multipart object")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_name("FILE")
                        .help("JSON upload configuration")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("source")
                        .long("source")
                        .value_name("PATH")
                        .help("File to upload")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(bucket.clone())
                .arg(key.clone().help("Object key, defaults to the source file name"))
                .arg(
                    Arg::new("part-size")
                        .long("part-size")
                        .value_name("BYTES")
                        .help("Part size in bytes")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .value_name("N")
                        .help("Simultaneous part uploads")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("max-retries")
                        .long("max-retries")
                        .value_name("N")
                        .help("Attempts per part")
                        .value_parser(value_parser!(u32)),
                )
                .arg(store_dir.clone())
                .arg(
                    Arg::new("verify")
                        .long("verify")
                        .help("Re-read the source and compare fingerprints after commit")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Compare a stored object with a local file")
                .arg(bucket.clone().required(true))
                .arg(key.clone().required(true))
                .arg(
                    Arg::new("source")
                        .long("source")
                        .value_name("PATH")
                        .help("Local file to compare against")
                        .value_parser(value_parser!(PathBuf))
                        .required(true),
                )
                .arg(store_dir.clone()),
        )
        .subcommand(
            Command::new("cat")
                .about("Write a stored object to stdout")
                .arg(bucket.required(true))
                .arg(key.required(true))
                .arg(store_dir),
        )
}

fn init_tracing(matches: &ArgMatches) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match matches.get_one::<String>("log-format").map(String::as_str) {
        Some("json") => builder.json().init(),
        _ => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(&matches);

    match matches.subcommand() {
        Some(("upload", sub)) => commands::upload(sub).await,
        Some(("verify", sub)) => commands::verify(sub).await,
        Some(("cat", sub)) => commands::cat(sub),
        _ => unreachable!("clap requires a subcommand"),
    }
}
