use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::core::{PhaseBody, PhaseScope};
use crate::error::PhaseError;

type PhaseFn = dyn Fn(PhaseScope) -> BoxFuture<'static, Result<String, PhaseError>> + Send + Sync;

/// Phase body backed by an async closure.
pub struct FnPhase {
    func: Box<PhaseFn>,
}

impl FnPhase {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(PhaseScope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, PhaseError>> + Send + 'static,
    {
        Self {
            func: Box::new(move |scope| func(scope).boxed()),
        }
    }
}

#[async_trait]
impl PhaseBody for FnPhase {
    async fn run(&self, scope: &PhaseScope) -> Result<String, PhaseError> {
        (self.func)(scope.clone()).await
    }
}
