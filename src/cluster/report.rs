//! Deployment report — per-node outcomes and the cluster-wide verdict.
//!
//! Per-node and per-unit failures are data, not errors: the orchestrator
//! always returns a report for partial failures, and the aggregate verdict
//! is the only thing callers need to branch on.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Failure,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Success => write!(f, "success"),
            Verdict::Failure => write!(f, "failure"),
        }
    }
}

/// Outcome of deploying one node within one phase.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    pub node: String,
    pub ip: String,
    /// Names of units that did not report healthy after start.
    pub failed_units: Vec<String>,
}

impl DeploymentResult {
    pub fn succeeded(&self) -> bool {
        self.failed_units.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub nodes: Vec<DeploymentResult>,
    pub summary: Verdict,
}

impl Default for ClusterReport {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            summary: Verdict::Failure,
        }
    }
}

impl ClusterReport {
    pub fn push(&mut self, result: DeploymentResult) {
        self.nodes.push(result);
    }

    /// Recompute and store the aggregate verdict.
    pub fn summarize(&mut self) -> Verdict {
        self.summary = aggregate(&self.nodes);
        self.summary
    }
}

/// Success iff every per-node result succeeded. Order-independent and
/// idempotent; an empty report is a success.
pub fn aggregate(results: &[DeploymentResult]) -> Verdict {
    if results.iter().all(|r| r.succeeded()) {
        Verdict::Success
    } else {
        Verdict::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(node: &str, failed: &[&str]) -> DeploymentResult {
        DeploymentResult {
            node: node.to_string(),
            ip: format!("10.0.0.{}", node.len()),
            failed_units: failed.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn empty_report_aggregates_to_success() {
        assert_eq!(aggregate(&[]), Verdict::Success);
    }

    #[test]
    fn single_clean_node_is_success() {
        assert_eq!(aggregate(&[result("a", &[])]), Verdict::Success);
    }

    #[test]
    fn any_failed_unit_flips_the_aggregate() {
        let results = vec![
            result("a", &[]),
            result("b", &["kube-scheduler"]),
            result("c", &[]),
        ];
        assert_eq!(aggregate(&results), Verdict::Failure);
    }

    #[test]
    fn aggregate_is_order_independent_and_idempotent() {
        let mut results = vec![result("a", &[]), result("b", &["etcd"])];
        let first = aggregate(&results);
        results.reverse();
        assert_eq!(aggregate(&results), first);
        assert_eq!(aggregate(&results), first);
    }

    #[test]
    fn summarize_updates_the_stored_verdict() {
        let mut report = ClusterReport::default();
        report.push(result("a", &[]));
        assert_eq!(report.summarize(), Verdict::Success);
        report.push(result("b", &["kubelet"]));
        assert_eq!(report.summarize(), Verdict::Failure);
        assert_eq!(report.summary, Verdict::Failure);
    }
}
