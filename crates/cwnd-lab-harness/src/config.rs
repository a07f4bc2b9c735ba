//! Experiment files: a `[defaults]` table followed by `[[scenario]]` tables,
//! each overriding only what it names.
//!
//! ```toml
//! name = "variant comparison"
//!
//! [defaults]
//! duration = "10s"
//! link = { bandwidth = "5Mbps", delay = "2ms" }
//!
//! [[scenario]]
//! id = "newreno"
//! variant = "new_reno"
//!
//! [[scenario]]
//! id = "cubic"
//! variant = "cubic"
//! ```

use cwnd_lab_abstract::{
    AddressPlan, CongestionVariant, DataRate, RatePattern, ScenarioDescriptor, ScenarioId, SimTime,
    TransportKind,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read experiment file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid experiment file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("experiment declares no scenarios")]
    Empty,
    #[error("scenario id '{0}' is declared more than once")]
    DuplicateId(ScenarioId),
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct LinkOverride {
    pub bandwidth: Option<DataRate>,
    pub delay: Option<SimTime>,
    pub error_rate: Option<f64>,
    pub queue_packets: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct TrafficOverride {
    pub protocol: Option<TransportKind>,
    pub port: Option<u16>,
    pub packet_size: Option<u32>,
    pub sender_start: Option<SimTime>,
    pub pattern: Option<RatePattern>,
    /// Shorthand for the rate of an on/off pattern.
    pub data_rate: Option<DataRate>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ScenarioOverride {
    pub variant: Option<CongestionVariant>,
    pub duration: Option<SimTime>,
    pub seed: Option<u64>,
    pub link: Option<LinkOverride>,
    pub traffic: Option<TrafficOverride>,
    pub addressing: Option<AddressPlan>,
}

impl ScenarioOverride {
    pub fn apply_to(&self, descriptor: &mut ScenarioDescriptor) {
        if let Some(v) = self.variant {
            descriptor.variant = v;
        }
        if let Some(v) = self.duration {
            descriptor.duration = v;
        }
        if let Some(v) = self.seed {
            descriptor.seed = v;
        }
        if let Some(v) = self.addressing {
            descriptor.addressing = v;
        }
        if let Some(link) = &self.link {
            let target = &mut descriptor.link;
            if let Some(v) = link.bandwidth {
                target.bandwidth = v;
            }
            if let Some(v) = link.delay {
                target.delay = v;
            }
            if let Some(v) = link.error_rate {
                target.error_rate = Some(v);
            }
            if let Some(v) = link.queue_packets {
                target.queue_packets = v;
            }
        }
        if let Some(traffic) = &self.traffic {
            let target = &mut descriptor.traffic;
            if let Some(v) = traffic.protocol {
                target.protocol = v;
            }
            if let Some(v) = traffic.port {
                target.port = v;
            }
            if let Some(v) = traffic.packet_size {
                target.packet_size = v;
            }
            if let Some(v) = traffic.sender_start {
                target.sender_start = v;
            }
            if let Some(v) = &traffic.pattern {
                target.pattern = v.clone();
            }
            if let Some(rate) = traffic.data_rate {
                match &mut target.pattern {
                    RatePattern::OnOff { data_rate, .. } => *data_rate = rate,
                    periodic => *periodic = RatePattern::constant_on(rate),
                }
            }
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(from = "EntryFields")]
pub struct ScenarioEntry {
    pub id: ScenarioId,
    pub overrides: ScenarioOverride,
}

// Read field by field so unknown keys are rejected.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EntryFields {
    id: ScenarioId,
    variant: Option<CongestionVariant>,
    duration: Option<SimTime>,
    seed: Option<u64>,
    link: Option<LinkOverride>,
    traffic: Option<TrafficOverride>,
    addressing: Option<AddressPlan>,
}

impl From<EntryFields> for ScenarioEntry {
    fn from(fields: EntryFields) -> Self {
        Self {
            id: fields.id,
            overrides: ScenarioOverride {
                variant: fields.variant,
                duration: fields.duration,
                seed: fields.seed,
                link: fields.link,
                traffic: fields.traffic,
                addressing: fields.addressing,
            },
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ExperimentFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub defaults: ScenarioOverride,
    #[serde(default, rename = "scenario")]
    pub scenarios: Vec<ScenarioEntry>,
}

impl ExperimentFile {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Descriptors in declaration order, defaults applied first. Parameter
    /// validation is left to the run so each scenario fails on its own.
    pub fn scenarios(&self) -> Result<Vec<ScenarioDescriptor>, ConfigError> {
        if self.scenarios.is_empty() {
            return Err(ConfigError::Empty);
        }
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.scenarios.len());
        for entry in &self.scenarios {
            if !seen.insert(&entry.id) {
                return Err(ConfigError::DuplicateId(entry.id.clone()));
            }
            let mut descriptor = ScenarioDescriptor::new(entry.id.clone());
            self.defaults.apply_to(&mut descriptor);
            entry.overrides.apply_to(&mut descriptor);
            out.push(descriptor);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWEEP: &str = r#"
        name = "sweep"

        [defaults]
        duration = "5s"
        seed = 7
        link = { bandwidth = "5Mbps", delay = "2ms" }

        [[scenario]]
        id = "slow"
        link = { delay = "50ms" }

        [[scenario]]
        id = "lossy"
        variant = "cubic"
        link = { error_rate = 0.001, queue_packets = 20 }
        traffic = { data_rate = "10Mbps" }

        [[scenario]]
        id = "udp"
        traffic = { protocol = "udp", pattern = { kind = "periodic", interval = "10ms", max_packets = 100 } }
    "#;

    #[test]
    fn entries_override_defaults() {
        let file = ExperimentFile::from_toml_str(SWEEP).unwrap();
        assert_eq!(file.name.as_deref(), Some("sweep"));
        let scenarios = file.scenarios().unwrap();
        assert_eq!(scenarios.len(), 3);

        let slow = &scenarios[0];
        assert_eq!(slow.id.as_str(), "slow");
        assert_eq!(slow.duration, SimTime::from_secs(5));
        assert_eq!(slow.seed, 7);
        assert_eq!(slow.link.delay, SimTime::from_millis(50));
        assert_eq!(slow.link.bandwidth, DataRate::from_mbps(5));
        assert_eq!(slow.variant, CongestionVariant::NewReno);

        let lossy = &scenarios[1];
        assert_eq!(lossy.variant, CongestionVariant::Cubic);
        assert_eq!(lossy.link.error_rate, Some(0.001));
        assert_eq!(lossy.link.queue_packets, 20);
        assert_eq!(lossy.link.delay, SimTime::from_millis(2));
        assert_eq!(
            lossy.traffic.pattern,
            RatePattern::constant_on(DataRate::from_mbps(10))
        );

        let udp = &scenarios[2];
        assert_eq!(udp.traffic.protocol, TransportKind::Udp);
        assert!(matches!(
            udp.traffic.pattern,
            RatePattern::Periodic { max_packets: 100, .. }
        ));
        assert!(scenarios.iter().all(|d| d.validate().is_ok()));
    }

    #[test]
    fn rejects_duplicates_and_empty_files() {
        let dup = ExperimentFile::from_toml_str("[[scenario]]\nid = \"a\"\n[[scenario]]\nid = \"a\"\n").unwrap();
        assert!(matches!(dup.scenarios(), Err(ConfigError::DuplicateId(id)) if id.as_str() == "a"));

        let empty = ExperimentFile::from_toml_str("name = \"nothing\"\n").unwrap();
        assert!(matches!(empty.scenarios(), Err(ConfigError::Empty)));
    }

    #[test]
    fn rejects_bad_units_and_unknown_keys() {
        let bad_rate = "[[scenario]]\nid = \"a\"\nlink = { bandwidth = \"fast\" }\n";
        assert!(matches!(
            ExperimentFile::from_toml_str(bad_rate),
            Err(ConfigError::Parse(_))
        ));
        let typo = "[[scenario]]\nid = \"a\"\nlink = { bandwith = \"5Mbps\" }\n";
        assert!(ExperimentFile::from_toml_str(typo).is_err());
    }

    #[test]
    fn misspelled_top_level_keys_are_errors() {
        let in_scenario = "[[scenario]]\nid = \"a\"\nvarient = \"cubic\"\n";
        let err = ExperimentFile::from_toml_str(in_scenario).unwrap_err();
        assert!(err.to_string().contains("varient"), "{err}");

        let in_defaults = "[defaults]\nduraton = \"1s\"\n\n[[scenario]]\nid = \"a\"\n";
        let err = ExperimentFile::from_toml_str(in_defaults).unwrap_err();
        assert!(err.to_string().contains("duraton"), "{err}");

        let in_file = "defualts = {}\n[[scenario]]\nid = \"a\"\n";
        assert!(matches!(
            ExperimentFile::from_toml_str(in_file),
            Err(ConfigError::Parse(_))
        ));

        let spelled = "[defaults]\nduration = \"1s\"\n[[scenario]]\nid = \"a\"\nvariant = \"cubic\"\n";
        let scenarios = ExperimentFile::from_toml_str(spelled).unwrap().scenarios().unwrap();
        assert_eq!(scenarios[0].variant, CongestionVariant::Cubic);
        assert_eq!(scenarios[0].duration, SimTime::from_secs(1));
    }

    #[test]
    fn bundled_experiments_are_valid() {
        for text in [
            include_str!("../../../experiments/single-run.toml"),
            include_str!("../../../experiments/variant-comparison.toml"),
            include_str!("../../../experiments/link-sweep.toml"),
            include_str!("../../../experiments/udp-throughput.toml"),
        ] {
            let scenarios = ExperimentFile::from_toml_str(text).unwrap().scenarios().unwrap();
            for d in &scenarios {
                assert!(d.validate().is_ok(), "{}: {:?}", d.id, d.validate());
            }
        }
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exp.toml");
        fs::write(&path, SWEEP).unwrap();
        assert_eq!(ExperimentFile::load(&path).unwrap().scenarios.len(), 3);
        assert!(matches!(
            ExperimentFile::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
