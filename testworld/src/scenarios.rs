//! Built-in world scenarios run against the simulator.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// TW-001: many groups provisioned in parallel
    ParallelBoot,

    /// TW-002: replicas discoverable under the group name
    ReplicaDns,

    /// TW-003: a failed replica surfaces on first use
    LazyFailure,

    /// TW-004: teardown waits for slow, failing creations
    SlowTeardown,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::ParallelBoot,
            ScenarioId::ReplicaDns,
            ScenarioId::LazyFailure,
            ScenarioId::SlowTeardown,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::ParallelBoot => "parallel_boot",
            ScenarioId::ReplicaDns => "replica_dns",
            ScenarioId::LazyFailure => "lazy_failure",
            ScenarioId::SlowTeardown => "slow_teardown",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::ParallelBoot => "8 groups created at once finish in about one creation latency",
            ScenarioId::ReplicaDns => "3 replicas all resolve under the group name via nslookup",
            ScenarioId::LazyFailure => "replica 2 of 3 fails; await_ready reports it without waiting on replica 3",
            ScenarioId::SlowTeardown => "destroy waits for a slow creation that fails and still writes the log",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "parallel_boot" | "parallelboot" | "tw-001" => Ok(ScenarioId::ParallelBoot),
            "replica_dns" | "replicadns" | "tw-002" => Ok(ScenarioId::ReplicaDns),
            "lazy_failure" | "lazyfailure" | "tw-003" => Ok(ScenarioId::LazyFailure),
            "slow_teardown" | "slowteardown" | "tw-004" => Ok(ScenarioId::SlowTeardown),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
            assert_eq!(id.to_string(), id.name());
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("TW-003".parse::<ScenarioId>(), Ok(ScenarioId::LazyFailure));
        assert_eq!("ReplicaDNS".parse::<ScenarioId>(), Ok(ScenarioId::ReplicaDns));
        assert!("chaos".parse::<ScenarioId>().is_err());
    }
}
