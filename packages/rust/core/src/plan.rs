//! Pipeline construction and planning.
//!
//! A [`Pipeline`] is only ever produced by [`PipelineBuilder::build`], which
//! rejects duplicate names, unregistered frameworks, dangling dependency
//! references and cycles before anything runs.

use std::collections::{HashMap, HashSet};

use augur_contract::AgentRegistry;
use augur_shared::{AugurError, Result};

/// One agent's placement in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStage {
    /// Unique within the pipeline; the key its output is merged under.
    pub name: String,
    /// Registered agent that runs for this stage.
    pub framework: String,
    /// Stages whose outputs must be present before this one runs.
    pub depends_on: Vec<String>,
}

impl PipelineStage {
    /// A stage named after its framework, with no dependencies.
    pub fn new(framework: impl Into<String>) -> Self {
        let framework = framework.into();
        Self {
            name: framework.clone(),
            framework,
            depends_on: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }
}

/// Collects stages before planning.
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    stages: Vec<PipelineStage>,
    synthesis: Option<PipelineStage>,
}

impl PipelineBuilder {
    pub fn stage(mut self, stage: PipelineStage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Designate the stage that runs last and sees every other stage's output.
    ///
    /// Its own `depends_on` entries stay hard requirements.
    pub fn synthesize_with(mut self, stage: PipelineStage) -> Self {
        self.synthesis = Some(stage);
        self
    }

    /// Validate the graph and compute the execution order.
    pub fn build(self, registry: &AgentRegistry) -> Result<Pipeline> {
        let synthesis_name = self.synthesis.as_ref().map(|s| s.name.clone());
        let mut stages = self.stages;
        stages.extend(self.synthesis);

        if stages.is_empty() {
            return Err(AugurError::config("pipeline has no stages"));
        }

        let mut seen = HashSet::new();
        for stage in &stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(AugurError::DuplicateStage {
                    stage: stage.name.clone(),
                });
            }
            if !registry.contains(&stage.framework) {
                return Err(AugurError::UnknownFramework {
                    name: stage.framework.clone(),
                });
            }
        }

        for stage in &stages {
            if let Some(missing) = stage.depends_on.iter().find(|d| !seen.contains(d.as_str())) {
                return Err(AugurError::UnknownStageReference {
                    stage: stage.name.clone(),
                    reference: missing.clone(),
                });
            }
        }

        // The synthesis stage's implicit inputs skip itself, so a declared
        // self-dependency has to be caught here.
        if let Some(name) = &synthesis_name {
            let synthesis = stages.iter().find(|s| &s.name == name);
            if synthesis.is_some_and(|s| s.depends_on.contains(name)) {
                return Err(AugurError::Cycle {
                    stages: vec![name.clone(), name.clone()],
                });
            }
        }

        let order = topological_order(&stages, synthesis_name.as_deref())?;
        let mut slots: Vec<Option<PipelineStage>> = stages.into_iter().map(Some).collect();
        let planned = order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect::<Vec<_>>();

        tracing::debug!(
            stages = ?planned.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            synthesis = ?synthesis_name,
            "pipeline planned"
        );

        Ok(Pipeline {
            stages: planned,
            synthesis: synthesis_name,
        })
    }
}

/// Every stage the one at `i` must wait for, hard or implicit.
fn waits_for<'a>(
    stages: &'a [PipelineStage],
    i: usize,
    synthesis: Option<&str>,
) -> Box<dyn Iterator<Item = &'a str> + 'a> {
    let stage = &stages[i];
    if synthesis == Some(stage.name.as_str()) {
        Box::new(
            stages
                .iter()
                .filter(move |s| s.name != stage.name)
                .map(|s| s.name.as_str()),
        )
    } else {
        Box::new(stage.depends_on.iter().map(String::as_str))
    }
}

/// Kahn's algorithm; ties go to declaration order.
fn topological_order(stages: &[PipelineStage], synthesis: Option<&str>) -> Result<Vec<usize>> {
    let index: HashMap<&str, usize> = stages
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    let mut placed = vec![false; stages.len()];
    let mut order = Vec::with_capacity(stages.len());

    while order.len() < stages.len() {
        let next = (0..stages.len()).find(|&i| {
            !placed[i] && waits_for(stages, i, synthesis).all(|dep| placed[index[dep]])
        });

        match next {
            Some(i) => {
                placed[i] = true;
                order.push(i);
            }
            None => {
                return Err(AugurError::Cycle {
                    stages: find_cycle(stages, synthesis, &index, &placed),
                });
            }
        }
    }

    Ok(order)
}

/// Follow unplaced dependencies from the first unplaced stage until one repeats.
fn find_cycle(
    stages: &[PipelineStage],
    synthesis: Option<&str>,
    index: &HashMap<&str, usize>,
    placed: &[bool],
) -> Vec<String> {
    let Some(mut current) = (0..stages.len()).find(|&i| !placed[i]) else {
        return Vec::new();
    };
    let mut path: Vec<usize> = Vec::new();

    loop {
        if let Some(pos) = path.iter().position(|&p| p == current) {
            let mut cycle: Vec<String> = path[pos..]
                .iter()
                .map(|&i| stages[i].name.clone())
                .collect();
            cycle.push(stages[current].name.clone());
            return cycle;
        }
        path.push(current);

        // An unplaced stage always waits on at least one unplaced stage.
        match waits_for(stages, current, synthesis)
            .map(|dep| index[dep])
            .find(|&d| !placed[d])
        {
            Some(next) => current = next,
            None => return path.iter().map(|&i| stages[i].name.clone()).collect(),
        }
    }
}

/// A validated, topologically ordered set of stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<PipelineStage>,
    synthesis: Option<String>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// A one-stage pipeline running `framework`.
    pub fn single(framework: &str, registry: &AgentRegistry) -> Result<Self> {
        Self::builder()
            .stage(PipelineStage::new(framework))
            .build(registry)
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn synthesis(&self) -> Option<&str> {
        self.synthesis.as_deref()
    }

    pub fn is_synthesis(&self, name: &str) -> bool {
        self.synthesis.as_deref() == Some(name)
    }

    /// Stages nothing else depends on, in execution order.
    pub fn sinks(&self) -> Vec<&str> {
        if let Some(synthesis) = self.synthesis() {
            return vec![synthesis];
        }
        self.stages
            .iter()
            .filter(|s| {
                !self
                    .stages
                    .iter()
                    .any(|other| other.depends_on.contains(&s.name))
            })
            .map(|s| s.name.as_str())
            .collect()
    }

    /// The stage whose response is the run's answer: the synthesis stage,
    /// else the only sink. `None` when several sinks compete.
    pub fn terminal(&self) -> Option<&str> {
        match self.sinks().as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Names the stage at `name` waits for before starting.
    pub fn waits_for(&self, name: &str) -> Vec<&str> {
        let Some(i) = self.stages.iter().position(|s| s.name == name) else {
            return Vec::new();
        };
        waits_for(&self.stages, i, self.synthesis()).collect()
    }
}
