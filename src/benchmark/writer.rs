use crate::error::{Error, Result};
use crate::statistics::{Operation, Statistics};
use bsharptree::{io::FileStream, BplusTreeBytes, Builder};
use std::{path::PathBuf, time::Instant};

pub struct Writer {
    tree: BplusTreeBytes<String, FileStream>,
    commit_every: u64,
    pending: u64,
    written: Vec<String>,
}

impl Writer {
    pub fn new(
        dir: PathBuf,
        key_size: usize,
        node_size: usize,
        buffer_size: usize,
        commit_every: u64,
    ) -> Result<Self> {
        let tree_path = dir.join("benchmark.tree");
        let block_path = dir.join("benchmark.blocks");
        for path in [&tree_path, &block_path] {
            if path.exists() {
                std::fs::remove_file(path)?;
                debug!("removed {}", path.display());
            }
        }
        let tree = Builder::<String>::new()
            .key_length(key_size)
            .node_size(node_size)
            .buffer_size(buffer_size)
            .create_bytes_files(&tree_path, &block_path)?;
        info!("writing to {}", dir.display());
        Ok(Self {
            tree,
            commit_every,
            pending: 0,
            written: Vec::new(),
        })
    }

    pub fn write(&mut self, key: String, value: &[u8], statistics: &mut Statistics) -> Result<()> {
        let now = Instant::now();
        self.tree.set(key.clone(), value)?;
        statistics.add(Operation::Write((key.len() + value.len()) as u64), now);
        self.written.push(key);
        self.pending += 1;
        if self.pending >= self.commit_every {
            self.commit(statistics)?;
        }
        Ok(())
    }

    pub fn commit(&mut self, statistics: &mut Statistics) -> Result<()> {
        let now = Instant::now();
        self.tree.commit()?;
        statistics.add(Operation::Commit, now);
        trace!("committed {} writes", self.pending);
        self.pending = 0;
        Ok(())
    }

    /// Reads every written key back and compares the value.
    pub fn check(&mut self, expected: &[u8], statistics: &mut Statistics) -> Result<()> {
        for key in &self.written {
            let now = Instant::now();
            let value = self.tree.get(key)?;
            statistics.add(Operation::Read, now);
            if value != expected {
                return Err(Error::Mismatch(key.clone()));
            }
        }
        Ok(())
    }

    pub fn close(mut self, statistics: &mut Statistics) -> Result<()> {
        self.commit(statistics)?;
        self.tree.shutdown()?;
        Ok(())
    }
}
