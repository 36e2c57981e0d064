//! Queen coordinator: the stateless policy module of a swarm.
//!
//! Given an objective string the queen produces an analysis (complexity,
//! components, capability needs, resource requirements) and a deterministic
//! execution plan for the selected strategy. She also casts the deciding
//! vote in swarm decisions according to her type.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::models::{QueenType, WorkerType};

/// Complexity bucket of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveComplexity {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ObjectiveComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }

    /// Base task estimate for this bucket.
    fn base_tasks(&self) -> usize {
        match self {
            Self::Low => 5,
            Self::Medium => 10,
            Self::High => 20,
            Self::VeryHigh => 30,
        }
    }
}

/// System component detected in an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Backend,
    Frontend,
    Data,
    Auth,
    Testing,
    Deployment,
    Monitoring,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Frontend => "frontend",
            Self::Data => "data",
            Self::Auth => "auth",
            Self::Testing => "testing",
            Self::Deployment => "deployment",
            Self::Monitoring => "monitoring",
        }
    }

    fn all() -> &'static [Component] {
        &[
            Self::Backend,
            Self::Frontend,
            Self::Data,
            Self::Auth,
            Self::Testing,
            Self::Deployment,
            Self::Monitoring,
        ]
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Backend => &["api", "server", "backend", "endpoint", "service", "rest"],
            Self::Frontend => &["ui", "frontend", "interface", "page", "component", "web"],
            Self::Data => &["database", "data", "storage", "schema", "query", "cache"],
            Self::Auth => &["auth", "login", "permission", "security", "token", "oauth"],
            Self::Testing => &["test", "qa", "verification", "coverage"],
            Self::Deployment => &["deploy", "release", "ci", "docker", "pipeline"],
            Self::Monitoring => &["monitor", "metrics", "logging", "alert", "observability"],
        }
    }

    /// Worker types needed to deliver this component.
    fn required_roles(&self) -> &'static [WorkerType] {
        match self {
            Self::Backend => &[WorkerType::Coder, WorkerType::Architect],
            Self::Frontend => &[WorkerType::Coder, WorkerType::Reviewer],
            Self::Data => &[WorkerType::Analyst, WorkerType::Architect],
            Self::Auth => &[WorkerType::Coder, WorkerType::Reviewer],
            Self::Testing => &[WorkerType::Tester],
            Self::Deployment => &[WorkerType::Coder, WorkerType::Optimizer],
            Self::Monitoring => &[WorkerType::Analyst, WorkerType::Optimizer],
        }
    }
}

/// Execution strategy produced by the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    DivideAndConquer,
    ParallelExecution,
    SequentialRefinement,
    ConsensusDriven,
    AdaptiveLearning,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DivideAndConquer => "divide_and_conquer",
            Self::ParallelExecution => "parallel_execution",
            Self::SequentialRefinement => "sequential_refinement",
            Self::ConsensusDriven => "consensus_driven",
            Self::AdaptiveLearning => "adaptive_learning",
        }
    }
}

/// Worker pool sizing derived from the task estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub min_workers: usize,
    pub optimal_workers: usize,
    pub estimated_time_min: usize,
}

/// Output of `analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveAnalysis {
    pub complexity: ObjectiveComplexity,
    pub components: Vec<Component>,
    pub required_capabilities: Vec<WorkerType>,
    pub estimated_tasks: usize,
    pub recommended_strategy: Strategy,
    pub resource_requirements: ResourceRequirements,
}

/// One phase of an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub tasks: Vec<String>,
    pub worker_types: Vec<WorkerType>,
    pub parallel: bool,
    #[serde(default)]
    pub requires_consensus: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_threshold: Option<f64>,
    #[serde(default)]
    pub learning: bool,
    /// task label -> worker type, present on parallel-execution plans
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment: Option<HashMap<String, WorkerType>>,
}

impl Phase {
    fn new(name: impl Into<String>, tasks: Vec<String>, worker_types: Vec<WorkerType>, parallel: bool) -> Self {
        Self {
            name: name.into(),
            tasks,
            worker_types,
            parallel,
            requires_consensus: false,
            consensus_threshold: None,
            learning: false,
            assignment: None,
        }
    }

    fn with_consensus(mut self, threshold: Option<f64>) -> Self {
        self.requires_consensus = true;
        self.consensus_threshold = threshold;
        self
    }
}

/// Deterministic phase list for one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub strategy: Strategy,
    pub phases: Vec<Phase>,
}

/// Outcome of a queen-arbitrated decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub queen_vote: String,
    pub result: String,
    pub confidence: f64,
}

/// Keywords whose presence raises the complexity score.
const COMPLEX_KEYWORDS: &[&str] = &[
    "integrate",
    "distributed",
    "scalable",
    "concurrent",
    "migrate",
    "orchestrate",
    "realtime",
    "architecture",
    "secure",
    "optimize",
];

const STRATEGIC_PREFERENCES: &[&str] = &["scalable", "maintainable", "extensible", "future"];
const TACTICAL_PREFERENCES: &[&str] = &["simple", "quick", "fast", "efficient"];

/// The queen of a swarm. Analysis and planning are pure; the adaptive
/// learning table is the only held state.
pub struct QueenCoordinator {
    queen_type: QueenType,
    /// topic -> option that previously succeeded (adaptive queens only)
    learning: RwLock<HashMap<String, String>>,
}

impl QueenCoordinator {
    pub fn new(queen_type: QueenType) -> Self {
        Self {
            queen_type,
            learning: RwLock::new(HashMap::new()),
        }
    }

    pub fn queen_type(&self) -> QueenType {
        self.queen_type
    }

    // ------------------------------------------------------------------
    // Analysis
    // ------------------------------------------------------------------

    /// Analyze an objective into complexity, components, capabilities, and
    /// a recommended strategy.
    pub fn analyze(&self, objective: &str) -> ObjectiveAnalysis {
        let lower = objective.to_lowercase();

        let components: Vec<Component> = Component::all()
            .iter()
            .copied()
            .filter(|c| c.keywords().iter().any(|k| lower.contains(k)))
            .collect();

        let length_bucket = if objective.len() > 100 { 2 } else { 1 };
        let keyword_hits = COMPLEX_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .count();
        let score = length_bucket + keyword_hits + components.len();

        let complexity = match score {
            0..=3 => ObjectiveComplexity::Low,
            4..=6 => ObjectiveComplexity::Medium,
            7..=9 => ObjectiveComplexity::High,
            _ => ObjectiveComplexity::VeryHigh,
        };

        let mut required_capabilities: Vec<WorkerType> = vec![WorkerType::Researcher];
        for component in &components {
            for role in component.required_roles() {
                if !required_capabilities.contains(role) {
                    required_capabilities.push(*role);
                }
            }
        }

        let estimated_tasks = complexity.base_tasks() + 3 * components.len();

        let resource_requirements = ResourceRequirements {
            min_workers: estimated_tasks.div_ceil(10).min(3),
            optimal_workers: estimated_tasks.div_ceil(5).min(8),
            estimated_time_min: estimated_tasks * 5,
        };

        let recommended_strategy = if components.len() > 3 && complexity != ObjectiveComplexity::Low
        {
            Strategy::DivideAndConquer
        } else if lower.contains("parallel") || components.len() > 5 {
            Strategy::ParallelExecution
        } else if lower.contains("iterative") || lower.contains("refine") {
            Strategy::SequentialRefinement
        } else if self.queen_type == QueenType::Adaptive {
            Strategy::AdaptiveLearning
        } else {
            Strategy::ConsensusDriven
        };

        ObjectiveAnalysis {
            complexity,
            components,
            required_capabilities,
            estimated_tasks,
            recommended_strategy,
            resource_requirements,
        }
    }

    // ------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------

    /// Produce the deterministic phase list for the analysis' strategy.
    pub fn create_plan(&self, analysis: &ObjectiveAnalysis) -> ExecutionPlan {
        let phases = match analysis.recommended_strategy {
            Strategy::DivideAndConquer => self.plan_divide_and_conquer(analysis),
            Strategy::ParallelExecution => self.plan_parallel_execution(analysis),
            Strategy::SequentialRefinement => self.plan_sequential_refinement(),
            Strategy::ConsensusDriven => self.plan_consensus_driven(analysis),
            Strategy::AdaptiveLearning => self.plan_adaptive_learning(),
        };
        ExecutionPlan {
            strategy: analysis.recommended_strategy,
            phases,
        }
    }

    fn plan_divide_and_conquer(&self, analysis: &ObjectiveAnalysis) -> Vec<Phase> {
        let mut phases = vec![Phase::new(
            "research-planning",
            vec!["research the problem space".into(), "plan the division of work".into()],
            vec![WorkerType::Researcher, WorkerType::Architect],
            true,
        )];
        for component in &analysis.components {
            phases.push(Phase::new(
                format!("build-{}", component.as_str()),
                vec![format!("implement the {} component", component.as_str())],
                vec![WorkerType::Coder, WorkerType::Architect],
                true,
            ));
        }
        phases.push(Phase::new(
            "integration-testing",
            vec!["integrate components".into(), "test the integrated system".into()],
            vec![WorkerType::Coder, WorkerType::Tester],
            false,
        ));
        phases.push(Phase::new(
            "optimization-documentation",
            vec!["optimize hot paths".into(), "document the system".into()],
            vec![WorkerType::Optimizer, WorkerType::Documenter],
            true,
        ));
        phases
    }

    fn plan_parallel_execution(&self, analysis: &ObjectiveAnalysis) -> Vec<Phase> {
        let tasks: Vec<String> = if analysis.components.is_empty() {
            (1..=analysis.estimated_tasks.min(10))
                .map(|i| format!("execute work item {i}"))
                .collect()
        } else {
            analysis
                .components
                .iter()
                .map(|c| format!("implement the {} component", c.as_str()))
                .collect()
        };

        let assignment: HashMap<String, WorkerType> = tasks
            .iter()
            .map(|task| (task.clone(), best_worker_type(task)))
            .collect();

        let mut phase = Phase::new(
            "parallel-execution",
            tasks,
            analysis.required_capabilities.clone(),
            true,
        );
        phase.assignment = Some(assignment);
        vec![phase]
    }

    fn plan_sequential_refinement(&self) -> Vec<Phase> {
        let mut phases = Vec::new();
        for iteration in 1..=3 {
            for step in ["design", "implement", "test", "review"] {
                let worker_types = match step {
                    "design" => vec![WorkerType::Architect],
                    "implement" => vec![WorkerType::Coder],
                    "test" => vec![WorkerType::Tester],
                    _ => vec![WorkerType::Reviewer],
                };
                phases.push(
                    Phase::new(
                        format!("iteration-{iteration}-{step}"),
                        vec![format!("{step} pass {iteration}")],
                        worker_types,
                        false,
                    )
                    .with_consensus(None),
                );
            }
        }
        phases
    }

    fn plan_consensus_driven(&self, analysis: &ObjectiveAnalysis) -> Vec<Phase> {
        let threshold = self.queen_type.consensus_threshold();
        let decision_points: Vec<String> = if analysis.components.is_empty() {
            vec!["overall approach".into()]
        } else {
            analysis
                .components
                .iter()
                .map(|c| format!("{} approach", c.as_str()))
                .collect()
        };

        decision_points
            .into_iter()
            .map(|point| {
                Phase::new(
                    format!("decide-{}", point.replace(' ', "-")),
                    vec![format!("reach consensus on the {point}")],
                    vec![WorkerType::Researcher, WorkerType::Analyst],
                    false,
                )
                .with_consensus(Some(threshold))
            })
            .collect()
    }

    fn plan_adaptive_learning(&self) -> Vec<Phase> {
        let mut exploration = Phase::new(
            "exploration",
            vec!["explore candidate approaches".into()],
            vec![WorkerType::Researcher, WorkerType::Coder],
            true,
        );
        exploration.learning = true;

        let mut analysis_phase = Phase::new(
            "analysis",
            vec!["analyze exploration results".into()],
            vec![WorkerType::Analyst, WorkerType::Researcher],
            false,
        );
        analysis_phase.learning = true;

        let mut implementation = Phase::new(
            "implementation",
            vec!["implement the selected approach".into()],
            vec![WorkerType::Coder, WorkerType::Tester],
            true,
        );
        implementation.learning = true;

        vec![exploration, analysis_phase, implementation]
    }

    // ------------------------------------------------------------------
    // Decisions
    // ------------------------------------------------------------------

    /// Cast the queen's vote and tally the final result. Worker votes count
    /// 1 each; the queen's vote carries her type's decision weight.
    pub fn make_decision(
        &self,
        topic: &str,
        options: &[String],
        worker_votes: &HashMap<String, String>,
    ) -> Option<DecisionOutcome> {
        if options.is_empty() {
            return None;
        }

        let queen_vote = self.queen_vote(topic, options, worker_votes);

        let mut weights: HashMap<&str, f64> = HashMap::new();
        for vote in worker_votes.values() {
            *weights.entry(vote.as_str()).or_insert(0.0) += 1.0;
        }
        let queen_weight = self.queen_type.decision_weight();
        *weights.entry(queen_vote.as_str()).or_insert(0.0) += queen_weight;

        let total: f64 = weights.values().sum();
        let (winner, winner_weight) = weights
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, v)| ((*k).to_string(), *v))?;

        Some(DecisionOutcome {
            queen_vote,
            confidence: if total > 0.0 { winner_weight / total } else { 0.0 },
            result: winner,
        })
    }

    /// Record a decision outcome so adaptive queens can recall it for
    /// related topics.
    pub fn record_outcome(&self, topic: &str, successful_option: &str) {
        if let Ok(mut learning) = self.learning.write() {
            learning.insert(topic.to_lowercase(), successful_option.to_string());
        }
    }

    fn queen_vote(
        &self,
        topic: &str,
        options: &[String],
        worker_votes: &HashMap<String, String>,
    ) -> String {
        match self.queen_type {
            QueenType::Strategic => prefer(options, STRATEGIC_PREFERENCES)
                .unwrap_or_else(|| options[0].clone()),
            QueenType::Tactical => {
                // Follow a clear worker majority; otherwise prefer quick wins.
                if !worker_votes.is_empty() {
                    let mut counts: HashMap<&str, usize> = HashMap::new();
                    for vote in worker_votes.values() {
                        *counts.entry(vote.as_str()).or_insert(0) += 1;
                    }
                    if let Some((winner, count)) =
                        counts.iter().max_by_key(|(_, count)| **count)
                    {
                        if *count as f64 / worker_votes.len() as f64 > 0.6 {
                            return (*winner).to_string();
                        }
                    }
                }
                prefer(options, TACTICAL_PREFERENCES).unwrap_or_else(|| options[0].clone())
            }
            QueenType::Adaptive => {
                let topic_lower = topic.to_lowercase();
                if let Ok(learning) = self.learning.read() {
                    for (past_topic, option) in learning.iter() {
                        let related = topic_lower
                            .split_whitespace()
                            .any(|word| past_topic.contains(word));
                        if related && options.contains(option) {
                            return option.clone();
                        }
                    }
                }
                options
                    .choose(&mut rand::thread_rng())
                    .cloned()
                    .unwrap_or_else(|| options[0].clone())
            }
        }
    }
}

/// First option containing any of the preferred keywords.
fn prefer(options: &[String], preferences: &[&str]) -> Option<String> {
    options
        .iter()
        .find(|option| {
            let lower = option.to_lowercase();
            preferences.iter().any(|p| lower.contains(p))
        })
        .cloned()
}

/// Best worker type for a task label by keyword score weighted by type.
pub fn best_worker_type(description: &str) -> WorkerType {
    let lower = description.to_lowercase();
    let mut best = WorkerType::Coder;
    let mut best_score = f64::MIN;
    for worker_type in WorkerType::all() {
        let hits = worker_type
            .keywords()
            .iter()
            .filter(|k| lower.contains(*k))
            .count();
        let score = hits as f64 * worker_type.type_weight();
        if score > best_score {
            best = *worker_type;
            best_score = score;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_simple_objective_is_low() {
        let queen = QueenCoordinator::new(QueenType::Strategic);
        let analysis = queen.analyze("list the files");
        assert_eq!(analysis.complexity, ObjectiveComplexity::Low);
        assert!(analysis.components.is_empty());
        assert_eq!(analysis.estimated_tasks, 5);
        assert_eq!(analysis.required_capabilities, vec![WorkerType::Researcher]);
    }

    #[test]
    fn test_analyze_detects_components() {
        let queen = QueenCoordinator::new(QueenType::Strategic);
        let analysis = queen.analyze("Build REST API with database and login auth");
        assert!(analysis.components.contains(&Component::Backend));
        assert!(analysis.components.contains(&Component::Data));
        assert!(analysis.components.contains(&Component::Auth));
        // researcher is always first in the capability union
        assert_eq!(analysis.required_capabilities[0], WorkerType::Researcher);
        assert!(analysis.required_capabilities.contains(&WorkerType::Coder));
    }

    #[test]
    fn test_estimated_tasks_formula() {
        let queen = QueenCoordinator::new(QueenType::Strategic);
        let analysis = queen.analyze("Build REST API with database and login auth");
        // base for its bucket plus 3 per component
        let base = match analysis.complexity {
            ObjectiveComplexity::Low => 5,
            ObjectiveComplexity::Medium => 10,
            ObjectiveComplexity::High => 20,
            ObjectiveComplexity::VeryHigh => 30,
        };
        assert_eq!(analysis.estimated_tasks, base + 3 * analysis.components.len());
    }

    #[test]
    fn test_resource_requirements_caps() {
        let queen = QueenCoordinator::new(QueenType::Strategic);
        let analysis = queen.analyze(
            "Build and deploy a scalable distributed realtime backend api with database, \
             auth login, frontend ui, test coverage, monitoring metrics and ci pipeline",
        );
        assert!(analysis.resource_requirements.min_workers <= 3);
        assert!(analysis.resource_requirements.optimal_workers <= 8);
        assert_eq!(
            analysis.resource_requirements.estimated_time_min,
            analysis.estimated_tasks * 5
        );
    }

    #[test]
    fn test_strategy_selection_order() {
        let queen = QueenCoordinator::new(QueenType::Strategic);

        // Many components and non-low complexity: divide and conquer.
        let analysis = queen.analyze(
            "Build a backend api with database storage, auth login, frontend ui and deploy pipeline",
        );
        assert!(analysis.components.len() > 3);
        assert_eq!(analysis.recommended_strategy, Strategy::DivideAndConquer);

        // Parallel keyword wins when component count is small.
        let analysis = queen.analyze("run these chores in parallel");
        assert_eq!(analysis.recommended_strategy, Strategy::ParallelExecution);

        // Iterative keyword.
        let analysis = queen.analyze("iterative cleanup of the module");
        assert_eq!(analysis.recommended_strategy, Strategy::SequentialRefinement);

        // Default for a strategic queen.
        let analysis = queen.analyze("tidy the workspace");
        assert_eq!(analysis.recommended_strategy, Strategy::ConsensusDriven);

        // Adaptive queens fall through to adaptive learning.
        let adaptive = QueenCoordinator::new(QueenType::Adaptive);
        let analysis = adaptive.analyze("tidy the workspace");
        assert_eq!(analysis.recommended_strategy, Strategy::AdaptiveLearning);
    }

    #[test]
    fn test_divide_and_conquer_plan_shape() {
        let queen = QueenCoordinator::new(QueenType::Strategic);
        let analysis = queen.analyze(
            "Build a backend api with database storage, auth login, frontend ui and deploy pipeline",
        );
        let plan = queen.create_plan(&analysis);
        assert_eq!(plan.strategy, Strategy::DivideAndConquer);

        assert_eq!(plan.phases.first().unwrap().name, "research-planning");
        assert!(plan.phases.first().unwrap().parallel);
        // One build phase per component between research and integration.
        assert_eq!(plan.phases.len(), 2 + analysis.components.len() + 1);
        let integration = &plan.phases[plan.phases.len() - 2];
        assert_eq!(integration.name, "integration-testing");
        assert!(!integration.parallel);
        assert_eq!(plan.phases.last().unwrap().name, "optimization-documentation");
    }

    #[test]
    fn test_sequential_refinement_has_three_iterations_with_consensus() {
        let queen = QueenCoordinator::new(QueenType::Tactical);
        let analysis = queen.analyze("iterative refine of the parser");
        let plan = queen.create_plan(&analysis);
        assert_eq!(plan.phases.len(), 12); // 3 iterations x 4 steps
        assert!(plan.phases.iter().all(|p| p.requires_consensus));
    }

    #[test]
    fn test_consensus_driven_threshold_follows_queen_type() {
        for (queen_type, expected) in [
            (QueenType::Strategic, 0.6),
            (QueenType::Tactical, 0.5),
            (QueenType::Adaptive, 0.55),
        ] {
            let queen = QueenCoordinator::new(queen_type);
            let analysis = ObjectiveAnalysis {
                complexity: ObjectiveComplexity::Low,
                components: vec![],
                required_capabilities: vec![WorkerType::Researcher],
                estimated_tasks: 5,
                recommended_strategy: Strategy::ConsensusDriven,
                resource_requirements: ResourceRequirements {
                    min_workers: 1,
                    optimal_workers: 1,
                    estimated_time_min: 25,
                },
            };
            let plan = queen.create_plan(&analysis);
            assert_eq!(plan.phases[0].consensus_threshold, Some(expected));
        }
    }

    #[test]
    fn test_parallel_plan_carries_assignment() {
        let queen = QueenCoordinator::new(QueenType::Strategic);
        let analysis = queen.analyze("run the backend api chores in parallel");
        let plan = queen.create_plan(&analysis);
        assert_eq!(plan.phases.len(), 1);
        let assignment = plan.phases[0].assignment.as_ref().unwrap();
        assert_eq!(assignment.len(), plan.phases[0].tasks.len());
    }

    #[test]
    fn test_adaptive_plan_restricts_analysis_phase() {
        let queen = QueenCoordinator::new(QueenType::Adaptive);
        let analysis = queen.analyze("tidy the workspace");
        let plan = queen.create_plan(&analysis);
        assert_eq!(plan.phases.len(), 3);
        let middle = &plan.phases[1];
        assert_eq!(middle.name, "analysis");
        assert_eq!(
            middle.worker_types,
            vec![WorkerType::Analyst, WorkerType::Researcher]
        );
        assert!(plan.phases.iter().all(|p| p.learning));
    }

    #[test]
    fn test_strategic_queen_prefers_scalable_options() {
        let queen = QueenCoordinator::new(QueenType::Strategic);
        let options = vec![
            "quick hack".to_string(),
            "scalable microservices".to_string(),
        ];
        let outcome = queen
            .make_decision("Architecture", &options, &HashMap::new())
            .unwrap();
        assert_eq!(outcome.queen_vote, "scalable microservices");
        assert_eq!(outcome.result, "scalable microservices");
    }

    #[test]
    fn test_tactical_queen_follows_worker_majority() {
        let queen = QueenCoordinator::new(QueenType::Tactical);
        let options = vec!["alpha".to_string(), "beta".to_string()];
        let mut votes = HashMap::new();
        votes.insert("w1".to_string(), "beta".to_string());
        votes.insert("w2".to_string(), "beta".to_string());
        votes.insert("w3".to_string(), "beta".to_string());
        votes.insert("w4".to_string(), "alpha".to_string());

        let outcome = queen.make_decision("Topic", &options, &votes).unwrap();
        assert_eq!(outcome.queen_vote, "beta");
        assert_eq!(outcome.result, "beta");
    }

    #[test]
    fn test_adaptive_queen_recalls_related_topics() {
        let queen = QueenCoordinator::new(QueenType::Adaptive);
        queen.record_outcome("storage layer design", "postgres");
        let options = vec!["postgres".to_string(), "sqlite".to_string()];
        let outcome = queen
            .make_decision("storage approach", &options, &HashMap::new())
            .unwrap();
        assert_eq!(outcome.queen_vote, "postgres");
    }

    #[test]
    fn test_decision_weight_tips_result() {
        // Strategic queen weight 3 beats two worker votes.
        let queen = QueenCoordinator::new(QueenType::Strategic);
        let options = vec![
            "fast hack".to_string(),
            "maintainable design".to_string(),
        ];
        let mut votes = HashMap::new();
        votes.insert("w1".to_string(), "fast hack".to_string());
        votes.insert("w2".to_string(), "fast hack".to_string());

        let outcome = queen.make_decision("Approach", &options, &votes).unwrap();
        assert_eq!(outcome.result, "maintainable design");
        assert!((outcome.confidence - 3.0 / 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_in_unit_interval() {
        let queen = QueenCoordinator::new(QueenType::Tactical);
        let options = vec!["only".to_string()];
        let outcome = queen
            .make_decision("Topic", &options, &HashMap::new())
            .unwrap();
        assert!(outcome.confidence > 0.0 && outcome.confidence <= 1.0);
    }

    #[test]
    fn test_best_worker_type_for_task_labels() {
        assert_eq!(best_worker_type("design api endpoints"), WorkerType::Architect);
        assert_eq!(best_worker_type("implement business logic"), WorkerType::Coder);
        assert_eq!(best_worker_type("create api tests"), WorkerType::Tester);
    }

    #[test]
    fn test_empty_options_yield_no_decision() {
        let queen = QueenCoordinator::new(QueenType::Strategic);
        assert!(queen.make_decision("Topic", &[], &HashMap::new()).is_none());
    }
}
