//! Flight definitions and the factories that rebuild them.

use std::sync::Arc;

use crate::error::EngineError;
use crate::parameters::Parameters;
use crate::registry::Registerable;
use crate::retry::RetryPolicy;
use crate::step::Step;

/// A step together with the retry policy it runs under.
#[derive(Clone)]
pub struct StepEntry {
    pub step: Arc<dyn Step>,
    pub retry: RetryPolicy,
}

impl StepEntry {
    pub fn new(step: Arc<dyn Step>, retry: RetryPolicy) -> Self {
        Self { step, retry }
    }

    pub fn name(&self) -> &str {
        self.step.name()
    }
}

/// Ordered list of steps making up one flight.
#[derive(Clone, Default)]
pub struct FlightDefinition {
    steps: Vec<StepEntry>,
}

impl FlightDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn step(mut self, step: impl Step + 'static, retry: RetryPolicy) -> Self {
        self.steps.push(StepEntry::new(Arc::new(step), retry));
        self
    }

    /// Append an already shared step.
    pub fn add(&mut self, entry: StepEntry) {
        self.steps.push(entry);
    }

    pub fn steps(&self) -> &[StepEntry] {
        &self.steps
    }

    pub fn get(&self, index: i64) -> Option<&StepEntry> {
        usize::try_from(index).ok().and_then(|i| self.steps.get(i))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Builds the definition for one flight type.
///
/// Definitions are rebuilt from the run's input whenever a run is resumed,
/// so `build` must be deterministic for a given input.
pub trait FlightFactory: Send + Sync {
    fn flight_type(&self) -> &str;

    fn build(&self, input: &Parameters) -> Result<FlightDefinition, EngineError>;
}

impl Registerable for dyn FlightFactory {
    fn registry_id(&self) -> &str {
        self.flight_type()
    }
}

/// Factory for definitions that do not depend on input.
pub struct StaticFlight {
    flight_type: String,
    steps: Vec<StepEntry>,
}

impl StaticFlight {
    pub fn new(flight_type: impl Into<String>, definition: FlightDefinition) -> Self {
        Self {
            flight_type: flight_type.into(),
            steps: definition.steps,
        }
    }
}

impl FlightFactory for StaticFlight {
    fn flight_type(&self) -> &str {
        &self.flight_type
    }

    fn build(&self, _input: &Parameters) -> Result<FlightDefinition, EngineError> {
        Ok(FlightDefinition {
            steps: self.steps.clone(),
        })
    }
}
