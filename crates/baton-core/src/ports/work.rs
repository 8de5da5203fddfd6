//! Work port - the body of a task.

use std::future::Future;

use async_trait::async_trait;

use crate::domain::{BoxError, Request};

/// One unit of a task body.
///
/// The task drives units `checkpoint + 1 ..= 100` and checks for pause and
/// cancel between them, so an implementation only has to do the work for
/// `unit`. An error ends the task with `TaskError::Execution`.
#[async_trait]
pub trait Work: Send + Sync {
    async fn step(&self, request: &Request, unit: u32) -> Result<(), BoxError>;
}

/// Adapter that turns an async closure into a [`Work`].
pub struct FnWork<F> {
    f: F,
}

/// Wrap `f(request, unit)` as a task body.
///
/// ```ignore
/// let work = work_fn(|_request, _unit| async { Ok(()) });
/// ```
pub fn work_fn<F, Fut>(f: F) -> FnWork<F>
where
    F: Fn(Request, u32) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    FnWork { f }
}

#[async_trait]
impl<F, Fut> Work for FnWork<F>
where
    F: Fn(Request, u32) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn step(&self, request: &Request, unit: u32) -> Result<(), BoxError> {
        (self.f)(request.clone(), unit).await
    }
}
