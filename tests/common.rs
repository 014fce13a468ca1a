#![allow(dead_code)]

use chrono::Local;
use env_logger::fmt::Color;
use log::Level;
use rand::{seq::SliceRandom, Rng};
use std::io::Write;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

pub fn init_logger() {
    env_logger::builder()
        .format(|buf, record: &log::Record| {
            let mut style = buf.style();
            let color = match record.level() {
                Level::Error => Color::Red,
                Level::Warn => Color::Yellow,
                Level::Info => Color::Green,
                Level::Debug => Color::Cyan,
                Level::Trace => Color::White,
            };
            style.set_color(color);
            writeln!(
                buf,
                "[{} {} {:>30}:{:^4}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                style.value(record.level()),
                record.module_path().unwrap_or(""),
                style.value(record.line().unwrap_or(0)),
                style.value(record.args())
            )
        })
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init()
        .unwrap_or(());
}

/// Fresh directory under the system temp dir, removed by [`clean`].
pub fn test_dir(name: &str) -> PathBuf {
    let path = env::temp_dir().join(format!("bsharptree_{}_{}", name, std::process::id()));
    if path.exists() {
        fs::remove_dir_all(&path).unwrap();
    }
    fs::create_dir_all(&path).unwrap();
    path
}

pub fn tree_files(dir: &Path) -> (PathBuf, PathBuf) {
    (dir.join("test.tree"), dir.join("test.blocks"))
}

pub fn clean(dir: PathBuf) {
    fs::remove_dir_all(dir).unwrap();
}

pub fn random_keys(count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    let mut keys: Vec<String> = (0..count)
        .map(|_| hex::encode(rng.gen::<[u8; 8]>()))
        .collect();
    keys.sort();
    keys.dedup();
    keys.shuffle(&mut rng);
    keys
}

pub fn generate_value(avg_size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let size = rng.gen_range(avg_size / 2..=avg_size + avg_size / 2);
    let mut buf = vec![0; size];
    rng.fill(buf.as_mut_slice());
    buf
}
