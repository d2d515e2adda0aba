//! Explicit registry mapping procedure kinds to the code that runs them.
//!
//! The registry is an ordinary object constructed at start-up and passed by
//! reference into the executor. Nothing here is process-global, so tests can
//! build isolated registries with exactly the operators they need.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::exec::transformation::{Dataset, DatasetId, Source, Transformation};
use crate::plan::graph::{ProcedureKind, ProcedureSpec};
use crate::values::Time;

/// Per-node context handed to builders at instantiation time.
#[derive(Clone, Debug)]
pub struct ExecContext {
    /// Dataset ids of the node's predecessors, in edge order.
    pub parents: Vec<DatasetId>,
    /// The plan's reference timestamp.
    pub now: Time,
}

/// Builds the transformation/dataset pair for one plan node.
pub trait TransformationBuilder: Send + Sync {
    fn build(
        &self,
        id: DatasetId,
        spec: &dyn ProcedureSpec,
        ctx: &ExecContext,
    ) -> Result<(Arc<dyn Transformation>, Arc<dyn Dataset>)>;
}

impl<F> TransformationBuilder for F
where
    F: Fn(DatasetId, &dyn ProcedureSpec, &ExecContext) -> Result<(Arc<dyn Transformation>, Arc<dyn Dataset>)>
        + Send
        + Sync,
{
    fn build(
        &self,
        id: DatasetId,
        spec: &dyn ProcedureSpec,
        ctx: &ExecContext,
    ) -> Result<(Arc<dyn Transformation>, Arc<dyn Dataset>)> {
        self(id, spec, ctx)
    }
}

/// Builds the source for a plan node with no predecessors.
pub trait SourceBuilder: Send + Sync {
    fn build(
        &self,
        id: DatasetId,
        spec: &dyn ProcedureSpec,
        ctx: &ExecContext,
    ) -> Result<Arc<dyn Source>>;
}

impl<F> SourceBuilder for F
where
    F: Fn(DatasetId, &dyn ProcedureSpec, &ExecContext) -> Result<Arc<dyn Source>> + Send + Sync,
{
    fn build(
        &self,
        id: DatasetId,
        spec: &dyn ProcedureSpec,
        ctx: &ExecContext,
    ) -> Result<Arc<dyn Source>> {
        self(id, spec, ctx)
    }
}

/// Start-up-time mapping from procedure kind to operator implementation.
#[derive(Default)]
pub struct TransformationRegistry {
    transformations: HashMap<ProcedureKind, Arc<dyn TransformationBuilder>>,
    sources: HashMap<ProcedureKind, Arc<dyn SourceBuilder>>,
}

impl TransformationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_transformation(
        &mut self,
        kind: impl Into<ProcedureKind>,
        builder: Arc<dyn TransformationBuilder>,
    ) -> &mut Self {
        self.transformations.insert(kind.into(), builder);
        self
    }

    pub fn register_source(
        &mut self,
        kind: impl Into<ProcedureKind>,
        builder: Arc<dyn SourceBuilder>,
    ) -> &mut Self {
        self.sources.insert(kind.into(), builder);
        self
    }

    pub fn transformation(&self, kind: &ProcedureKind) -> Result<&Arc<dyn TransformationBuilder>> {
        match self.transformations.get(kind) {
            Some(b) => Ok(b),
            None => bail!("no transformation registered for kind {kind}"),
        }
    }

    pub fn source(&self, kind: &ProcedureKind) -> Result<&Arc<dyn SourceBuilder>> {
        match self.sources.get(kind) {
            Some(b) => Ok(b),
            None => bail!("no source registered for kind {kind}"),
        }
    }
}
