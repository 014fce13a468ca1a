#[macro_use]
extern crate log;

use clap::{value_parser, Arg, ArgMatches, Command};
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Instant;

mod error;
mod generator;
mod statistics;
mod writer;

use error::{Error, Result};
use generator::Generator;
use statistics::Statistics;
use writer::Writer;

fn main() {
    println!("{:_^41}", "BSHARPTREE_BENCHMARK");
    env_logger::Builder::new()
        .filter_module("benchmark", LevelFilter::Info)
        .filter_module("bsharptree", LevelFilter::Warn)
        .init();
    if let Err(e) = start_app() {
        error!("benchmark failed: {}", e);
        std::process::exit(1);
    }
}

fn start_app() -> Result<()> {
    let matches = prepare_matches();
    let count: u64 = arg(&matches, "count")?;
    let key_size: usize = arg(&matches, "key_size")?;
    let value_size: usize = arg(&matches, "value_size")?;
    let commit_every: u64 = arg(&matches, "commit_every")?;
    let node_size: usize = arg(&matches, "node_size")?;
    let buffer_size: usize = arg(&matches, "buffer_size")?;
    let dir: PathBuf = arg(&matches, "dst_dir")?;

    info!("create new generator");
    let mut generator = Generator::new(key_size, value_size, count);
    info!("create new writer");
    let mut writer = Writer::new(dir, key_size, node_size, buffer_size, commit_every.max(1))?;
    let mut statistics = Statistics::new();

    info!("start write cycle");
    let mut value = Vec::new();
    while let Some((key, generated)) = generator.next() {
        writer.write(key, &generated, &mut statistics)?;
        value = generated;
    }
    let now = Instant::now();
    writer.commit(&mut statistics)?;
    info!("writes committed in {:?}", now.elapsed());

    info!("start read cycle");
    writer.check(&value, &mut statistics)?;
    writer.close(&mut statistics)?;
    statistics.display();
    Ok(())
}

fn arg<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, name: &'static str) -> Result<T> {
    matches
        .get_one::<T>(name)
        .cloned()
        .ok_or(Error::Argument(name))
}

fn prepare_matches() -> ArgMatches {
    Command::new("benchmark")
        .arg(
            Arg::new("count")
                .short('n')
                .takes_value(true)
                .value_parser(value_parser!(u64))
                .default_value("100000")
                .help("number of keys to write"),
        )
        .arg(
            Arg::new("key_size")
                .short('k')
                .takes_value(true)
                .value_parser(value_parser!(usize))
                .default_value("32"),
        )
        .arg(
            Arg::new("value_size")
                .short('v')
                .takes_value(true)
                .value_parser(value_parser!(usize))
                .default_value("100"),
        )
        .arg(
            Arg::new("commit_every")
                .short('c')
                .takes_value(true)
                .value_parser(value_parser!(u64))
                .default_value("1000")
                .help("writes between commits"),
        )
        .arg(
            Arg::new("node_size")
                .long("node-size")
                .takes_value(true)
                .value_parser(value_parser!(usize))
                .default_value("32"),
        )
        .arg(
            Arg::new("buffer_size")
                .long("buffer-size")
                .takes_value(true)
                .value_parser(value_parser!(usize))
                .default_value("1024"),
        )
        .arg(
            Arg::new("dst_dir")
                .long("dir")
                .takes_value(true)
                .value_parser(value_parser!(PathBuf))
                .default_value("/tmp"),
        )
        .get_matches()
}
