//! Persisted window traces: one `<scenario>.cwnd` file per run, one line per
//! sample, `<seconds> <old window> <new window>`.

use cwnd_lab_abstract::{CongestionWindowSample, ScenarioId, SimTime};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TRACE_EXTENSION: &str = "cwnd";

#[derive(Debug, Error)]
pub enum TraceFileError {
    #[error("failed to access trace file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}:{line}: {reason}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Directory holding the traces of one experiment.
#[derive(Debug, Clone)]
pub struct TraceStore {
    dir: PathBuf,
}

impl TraceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, scenario: &ScenarioId) -> PathBuf {
        self.dir
            .join(format!("{}.{TRACE_EXTENSION}", scenario.as_str()))
    }

    /// Writes (or replaces) the scenario's trace and returns its path.
    pub fn write(
        &self,
        scenario: &ScenarioId,
        samples: &[CongestionWindowSample],
    ) -> Result<PathBuf, TraceFileError> {
        let path = self.path_for(scenario);
        let io_err = |source: io::Error| TraceFileError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let mut out = BufWriter::new(File::create(&path).map_err(io_err)?);
        write_samples(&mut out, samples).map_err(io_err)?;
        out.flush().map_err(io_err)?;
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Vec<CongestionWindowSample>, TraceFileError> {
        let file = File::open(path).map_err(|source| TraceFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_samples(BufReader::new(file), path)
    }
}

pub fn write_samples<W: Write>(out: &mut W, samples: &[CongestionWindowSample]) -> io::Result<()> {
    for s in samples {
        writeln!(
            out,
            "{} {} {}",
            s.time.to_trace_string(),
            s.old_window,
            s.new_window
        )?;
    }
    Ok(())
}

/// Parses trace lines; `origin` only labels errors. Blank lines are skipped,
/// timestamps must not decrease.
pub fn parse_samples<R: BufRead>(
    input: R,
    origin: &Path,
) -> Result<Vec<CongestionWindowSample>, TraceFileError> {
    let malformed = |line: usize, reason: String| TraceFileError::Malformed {
        path: origin.to_path_buf(),
        line,
        reason,
    };
    let mut samples: Vec<CongestionWindowSample> = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        let lineno = idx + 1;
        let line = line.map_err(|source| TraceFileError::Io {
            path: origin.to_path_buf(),
            source,
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [time, old, new] = fields[..] else {
            return Err(malformed(
                lineno,
                format!("expected 3 fields, found {}", fields.len()),
            ));
        };
        let time = SimTime::parse_trace_secs(time).map_err(|e| malformed(lineno, e.to_string()))?;
        let window = |field: &str| {
            field
                .parse::<u32>()
                .map_err(|e| malformed(lineno, format!("window '{field}': {e}")))
        };
        let sample = CongestionWindowSample::new(time, window(old)?, window(new)?);
        if let Some(last) = samples.last()
            && sample.time < last.time
        {
            return Err(malformed(lineno, "timestamp goes backwards".to_string()));
        }
        samples.push(sample);
    }
    Ok(samples)
}
