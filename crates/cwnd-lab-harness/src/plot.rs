//! Chart export. The harness never renders anything itself; it hands ordered
//! series and a [`ChartSpec`] to a [`PlotSink`].

use crate::analysis::window_series;
use crate::report::{ExperimentReport, RunResult};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("chart '{0}' has no data points")]
    Empty(String),
    #[error("failed to write plot script {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    /// Gnuplot terminal, e.g. `png size 800,600`.
    pub terminal: String,
    /// File the rendered image is written to.
    pub output: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeriesStyle {
    #[default]
    LinesPoints,
    Lines,
    Points,
    Steps,
}

impl SeriesStyle {
    fn gnuplot(self) -> &'static str {
        match self {
            SeriesStyle::LinesPoints => "linespoints",
            SeriesStyle::Lines => "lines",
            SeriesStyle::Points => "points",
            SeriesStyle::Steps => "steps",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub label: String,
    pub style: SeriesStyle,
    pub points: Vec<(f64, f64)>,
}

impl Series {
    pub fn new(label: impl Into<String>, style: SeriesStyle, points: Vec<(f64, f64)>) -> Self {
        Self {
            label: label.into(),
            style,
            points,
        }
    }
}

/// Receives finished charts.
pub trait PlotSink {
    fn plot(&mut self, spec: &ChartSpec, series: &[Series]) -> Result<(), PlotError>;
}

/// Writes one self-contained gnuplot script per chart, data inlined.
#[derive(Debug, Clone)]
pub struct GnuplotScript {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl GnuplotScript {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    /// Scripts written so far, in order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn script_path(&self, spec: &ChartSpec) -> PathBuf {
        let stem = spec
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chart".to_string());
        self.dir.join(format!("{stem}.plt"))
    }
}

impl PlotSink for GnuplotScript {
    fn plot(&mut self, spec: &ChartSpec, series: &[Series]) -> Result<(), PlotError> {
        if series.iter().all(|s| s.points.is_empty()) {
            return Err(PlotError::Empty(spec.title.clone()));
        }
        let path = self.script_path(spec);
        let io_err = |source: io::Error| PlotError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let mut out = BufWriter::new(File::create(&path).map_err(io_err)?);
        write_script(&mut out, spec, series).map_err(io_err)?;
        out.flush().map_err(io_err)?;
        self.written.push(path);
        Ok(())
    }
}

fn quoted(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

pub fn write_script<W: Write>(out: &mut W, spec: &ChartSpec, series: &[Series]) -> io::Result<()> {
    writeln!(out, "set terminal {}", spec.terminal)?;
    writeln!(out, "set output {}", quoted(&spec.output.to_string_lossy()))?;
    writeln!(out, "set title {}", quoted(&spec.title))?;
    writeln!(out, "set xlabel {}", quoted(&spec.x_label))?;
    writeln!(out, "set ylabel {}", quoted(&spec.y_label))?;
    writeln!(out, "set grid")?;

    let plotted: Vec<&Series> = series.iter().filter(|s| !s.points.is_empty()).collect();
    let clauses: Vec<String> = plotted
        .iter()
        .map(|s| format!("\"-\" title {} with {}", quoted(&s.label), s.style.gnuplot()))
        .collect();
    writeln!(out, "plot {}", clauses.join(", "))?;
    for s in plotted {
        for (x, y) in &s.points {
            writeln!(out, "{x} {y}")?;
        }
        writeln!(out, "e")?;
    }
    Ok(())
}

/// Congestion window over time for one run.
pub fn window_chart(result: &RunResult, image_dir: &Path) -> (ChartSpec, Vec<Series>) {
    let id = result.scenario();
    let spec = ChartSpec {
        title: format!("Congestion window, {} ({})", id, result.variant()),
        x_label: "Time (s)".to_string(),
        y_label: "Congestion window (bytes)".to_string(),
        terminal: "png size 800,600".to_string(),
        output: image_dir.join(format!("{id}-cwnd.png")),
    };
    let series = vec![Series::new(
        result.variant().to_string(),
        SeriesStyle::Steps,
        window_series(result.samples()),
    )];
    (spec, series)
}

/// Throughput against link delay, one point per run in execution order.
pub fn latency_throughput_chart(report: &ExperimentReport, image_dir: &Path) -> (ChartSpec, Vec<Series>) {
    let spec = ChartSpec {
        title: "Latency vs throughput".to_string(),
        x_label: "Link delay (ms)".to_string(),
        y_label: "Throughput (Mbps)".to_string(),
        terminal: "png size 800,600".to_string(),
        output: image_dir.join("latency-throughput.png"),
    };
    let points = report
        .latency_throughput_series()
        .into_iter()
        .map(|p| (p.delay_ms, p.throughput_mbps))
        .collect();
    (spec, vec![Series::new("throughput", SeriesStyle::LinesPoints, points)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ChartSpec {
        ChartSpec {
            title: "cwnd \"base\"".to_string(),
            x_label: "Time (s)".to_string(),
            y_label: "bytes".to_string(),
            terminal: "png".to_string(),
            output: PathBuf::from("out/base.png"),
        }
    }

    #[test]
    fn script_inlines_each_series() {
        let series = [
            Series::new("NewReno", SeriesStyle::Steps, vec![(1.0, 10_000.0), (1.5, 20_000.0)]),
            Series::new("empty", SeriesStyle::Lines, vec![]),
            Series::new("CUBIC", SeriesStyle::Lines, vec![(1.0, 10_000.0)]),
        ];
        let mut out = Vec::new();
        write_script(&mut out, &spec(), &series).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "set terminal png\n\
             set output \"out/base.png\"\n\
             set title \"cwnd \\\"base\\\"\"\n\
             set xlabel \"Time (s)\"\n\
             set ylabel \"bytes\"\n\
             set grid\n\
             plot \"-\" title \"NewReno\" with steps, \"-\" title \"CUBIC\" with lines\n\
             1 10000\n\
             1.5 20000\n\
             e\n\
             1 10000\n\
             e\n"
        );
    }

    #[test]
    fn gnuplot_sink_writes_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = GnuplotScript::new(dir.path());
        let series = [Series::new("a", SeriesStyle::default(), vec![(2.0, 4.5)])];
        sink.plot(&spec(), &series).unwrap();
        assert_eq!(sink.written(), &[dir.path().join("base.plt")]);
        assert!(fs::read_to_string(&sink.written()[0]).unwrap().contains("2 4.5\ne\n"));

        let err = sink.plot(&spec(), &[Series::new("none", SeriesStyle::Lines, vec![])]);
        assert!(matches!(err, Err(PlotError::Empty(_))));
        assert_eq!(sink.written().len(), 1);
    }
}
