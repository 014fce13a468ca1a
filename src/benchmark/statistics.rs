use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Statistics {
    writes: Vec<Duration>,
    reads: Vec<Duration>,
    commits: Vec<Duration>,
    bytes_written: u64,
    started: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
pub enum Operation {
    Write(u64),
    Read,
    Commit,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            started: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn add(&mut self, operation: Operation, started: Instant) {
        let latency = started.elapsed();
        match operation {
            Operation::Write(bytes) => {
                self.bytes_written += bytes;
                self.writes.push(latency);
            }
            Operation::Read => self.reads.push(latency),
            Operation::Commit => self.commits.push(latency),
        }
    }

    pub fn display(&mut self) {
        let elapsed = self.started.map_or(Duration::ZERO, |started| started.elapsed());
        println!("{:-^41}", "");
        Self::display_latencies("write", &mut self.writes);
        Self::display_latencies("read", &mut self.reads);
        Self::display_latencies("commit", &mut self.commits);
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            println!(
                "total {:.2}s, {:.0} writes/s, {:.2} MB/s written",
                secs,
                self.writes.len() as f64 / secs,
                self.bytes_written as f64 / secs / 1_000_000.0
            );
        }
    }

    fn display_latencies(name: &str, latencies: &mut [Duration]) {
        if latencies.is_empty() {
            return;
        }
        latencies.sort_unstable();
        let total: Duration = latencies.iter().sum();
        let avg = total / latencies.len() as u32;
        let p99 = latencies[(latencies.len() - 1) * 99 / 100];
        let max = latencies[latencies.len() - 1];
        println!(
            "{:>7}: {:>9} ops, avg {:?}, p99 {:?}, max {:?}",
            name,
            latencies.len(),
            avg,
            p99,
            max
        );
    }
}
