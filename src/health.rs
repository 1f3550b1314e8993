use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::probe::{PortProbe, TcpProbe, DEFAULT_PROBE_TIMEOUT};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorTarget {
    pub name: String,
    pub port: u16,
}

impl MonitorTarget {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Up,
    Down,
}

impl ServiceStatus {
    pub fn is_up(self) -> bool {
        matches!(self, ServiceStatus::Up)
    }
}

impl From<bool> for ServiceStatus {
    fn from(reachable: bool) -> Self {
        if reachable {
            ServiceStatus::Up
        } else {
            ServiceStatus::Down
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Up => f.write_str("UP"),
            ServiceStatus::Down => f.write_str("DOWN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHealth {
    #[serde(flatten)]
    pub target: MonitorTarget,
    pub status: ServiceStatus,
}

impl fmt::Display for TargetHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.target.name, self.status, self.target.port)
    }
}

/// Result of one report cycle, in target configuration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<TargetHealth>,
}

impl HealthSnapshot {
    pub fn status_of(&self, name: &str) -> Option<ServiceStatus> {
        self.entries
            .iter()
            .find(|e| e.target.name == name)
            .map(|e| e.status)
    }

    pub fn all_up(&self) -> bool {
        self.entries.iter().all(|e| e.status.is_up())
    }

    pub fn down_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.status.is_up()).count()
    }

    /// One `"<name>: <UP|DOWN> (<port>)"` line per target.
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.to_string()).collect()
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for entry in &self.entries {
            writeln!(out, "{}", entry)?;
        }
        out.flush()
    }
}

/// Probes a fixed, ordered set of targets on one host.
pub struct ServiceHealthReporter {
    targets: Vec<MonitorTarget>,
    host: String,
    timeout: Duration,
    probe: Arc<dyn PortProbe>,
}

impl ServiceHealthReporter {
    pub fn new(targets: Vec<MonitorTarget>) -> Self {
        Self {
            targets,
            host: "localhost".to_string(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            probe: Arc::new(TcpProbe::new()),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn PortProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn targets(&self) -> &[MonitorTarget] {
        &self.targets
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Probe every target and collect the results without printing.
    ///
    /// Targets are probed concurrently but the snapshot keeps configuration
    /// order. A probe task that dies (panics or is cancelled) counts as DOWN.
    pub async fn snapshot(&self) -> HealthSnapshot {
        let handles: Vec<_> = self
            .targets
            .iter()
            .map(|target| {
                let probe = Arc::clone(&self.probe);
                let host = self.host.clone();
                let port = target.port;
                let limit = self.timeout;
                tokio::spawn(async move { probe.probe(&host, port, limit).await })
            })
            .collect();

        let mut entries = Vec::with_capacity(self.targets.len());
        for (target, handle) in self.targets.iter().zip(handles) {
            let reachable = match handle.await {
                Ok(reachable) => reachable,
                Err(e) => {
                    warn!("Probe for {} ({}) failed unexpectedly: {}", target.name, target.port, e);
                    false
                }
            };
            entries.push(TargetHealth {
                target: target.clone(),
                status: ServiceStatus::from(reachable),
            });
        }

        HealthSnapshot {
            taken_at: Utc::now(),
            entries,
        }
    }

    /// Probe all targets and print one status line per target to stdout.
    pub async fn report(&self) -> HealthSnapshot {
        let snapshot = self.snapshot().await;

        info!(
            "Sentinel health check at {}: {}/{} targets up",
            snapshot.taken_at.format("%H:%M:%S"),
            snapshot.entries.len() - snapshot.down_count(),
            snapshot.entries.len()
        );

        let stdout = io::stdout();
        let mut out = stdout.lock();
        if let Err(e) = snapshot.write_to(&mut out) {
            warn!("Failed to write health report: {}", e);
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct FixedProbe {
        open: HashSet<u16>,
    }

    #[async_trait]
    impl PortProbe for FixedProbe {
        async fn probe(&self, _host: &str, port: u16, _timeout: Duration) -> bool {
            self.open.contains(&port)
        }
    }

    struct PanickingProbe;

    #[async_trait]
    impl PortProbe for PanickingProbe {
        async fn probe(&self, _host: &str, port: u16, _timeout: Duration) -> bool {
            if port == 1 {
                panic!("probe blew up");
            }
            true
        }
    }

    #[test]
    fn test_line_format() {
        let entry = TargetHealth {
            target: MonitorTarget::new("A", 9001),
            status: ServiceStatus::Down,
        };
        assert_eq!(entry.to_string(), "A: DOWN (9001)");
    }

    #[tokio::test]
    async fn test_snapshot_keeps_configuration_order() {
        let reporter = ServiceHealthReporter::new(vec![
            MonitorTarget::new("C", 3),
            MonitorTarget::new("A", 1),
            MonitorTarget::new("B", 2),
        ])
        .with_probe(Arc::new(FixedProbe {
            open: [1, 3].into_iter().collect(),
        }));

        let snapshot = reporter.snapshot().await;
        assert_eq!(
            snapshot.lines(),
            vec!["C: UP (3)", "A: UP (1)", "B: DOWN (2)"]
        );
        assert!(!snapshot.all_up());
        assert_eq!(snapshot.down_count(), 1);
        assert_eq!(snapshot.status_of("B"), Some(ServiceStatus::Down));
        assert_eq!(snapshot.status_of("missing"), None);
    }

    #[tokio::test]
    async fn test_panicking_probe_counts_as_down() {
        let reporter = ServiceHealthReporter::new(vec![
            MonitorTarget::new("boom", 1),
            MonitorTarget::new("fine", 2),
        ])
        .with_probe(Arc::new(PanickingProbe));

        let snapshot = reporter.snapshot().await;
        assert_eq!(snapshot.lines(), vec!["boom: DOWN (1)", "fine: UP (2)"]);
    }

    #[tokio::test]
    async fn test_empty_target_set_reports_nothing() {
        let reporter = ServiceHealthReporter::new(Vec::new());
        let snapshot = reporter.snapshot().await;
        assert!(snapshot.entries.is_empty());
        assert!(snapshot.all_up());
    }

    #[test]
    fn test_write_to_emits_one_line_per_target() {
        let snapshot = HealthSnapshot {
            taken_at: Utc::now(),
            entries: vec![
                TargetHealth {
                    target: MonitorTarget::new("A", 9001),
                    status: ServiceStatus::Down,
                },
                TargetHealth {
                    target: MonitorTarget::new("B", 9002),
                    status: ServiceStatus::Up,
                },
            ],
        };

        let mut out = Vec::new();
        snapshot.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "A: DOWN (9001)\nB: UP (9002)\n");
    }
}
