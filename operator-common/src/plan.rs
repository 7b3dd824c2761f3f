//! An ordered-step plan runner for composite operations.
//!
//! This is the teacher's `Constructor`/`Progressor` pattern
//! (`controller::reconciler::construct`/`progress` in the original
//! `operator-common`) collapsed into one type and stripped of Kubernetes
//! status-`Conditions` bookkeeping: our composite operations build plain
//! orchestrator resources from a `ConfigMap`, not a custom resource with a
//! status subresource, so there is nothing to attach conditions to.
//!
//! A [`Plan`] is the ordered sequence of per-resource reconcile calls a
//! composite operation assembles (`spec.md` §4.3): steps run in order,
//! and the first failing step aborts the remaining steps with its cause —
//! no compensation is attempted, matching "on any step failure the
//! composite fails with the first cause."

use crate::error::ReconcileError;
use async_trait::async_trait;
use std::future::Future;

#[async_trait]
pub trait PlanStep<C>: Send + Sync
where
    C: Send + Sync,
{
    /// A short, stable name used only for logging.
    fn name(&self) -> &str;

    async fn run(&self, context: C) -> Result<C, ReconcileError>;
}

#[async_trait]
impl<S, F, Fut, C> PlanStep<C> for (S, F)
where
    S: AsRef<str> + Send + Sync,
    F: Fn(C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<C, ReconcileError>> + Send,
    C: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.0.as_ref()
    }

    async fn run(&self, context: C) -> Result<C, ReconcileError> {
        (self.1)(context).await
    }
}

pub struct Plan<'p, C>(Vec<Box<dyn PlanStep<C> + 'p>>);

impl<'p, C> Plan<'p, C>
where
    C: Send + Sync,
{
    pub fn new(steps: Vec<Box<dyn PlanStep<C> + 'p>>) -> Self {
        Self(steps)
    }

    /// Run every step in order against `context`, short-circuiting on the
    /// first error. Each successful step's output context feeds the next.
    pub async fn run(&self, mut context: C) -> Result<C, ReconcileError> {
        for step in &self.0 {
            tracing::debug!(step = step.name(), "running composite step");
            context = step.run(context).await.map_err(|err| {
                tracing::error!(step = step.name(), error = %err, "composite step failed");
                err
            })?;
        }
        Ok(context)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn runs_all_steps_in_order() {
        let plan = Plan::<Vec<&'static str>>::new(vec![
            Box::new(("a", |mut ctx: Vec<&'static str>| async move {
                ctx.push("a");
                Ok(ctx)
            })),
            Box::new(("b", |mut ctx: Vec<&'static str>| async move {
                ctx.push("b");
                Ok(ctx)
            })),
        ]);

        let result = plan.run(vec![]).await.unwrap();
        assert_eq!(result, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let plan = Plan::<Vec<&'static str>>::new(vec![
            Box::new(("a", |mut ctx: Vec<&'static str>| async move {
                ctx.push("a");
                Ok(ctx)
            })),
            Box::new(("b", |_ctx: Vec<&'static str>| async move {
                Err(ReconcileError::permanent("boom"))
            })),
            Box::new(("c", |mut ctx: Vec<&'static str>| async move {
                ctx.push("c");
                Ok(ctx)
            })),
        ]);

        let err = plan.run(vec![]).await.unwrap_err();
        assert_eq!(err, ReconcileError::permanent("boom"));
    }
}
