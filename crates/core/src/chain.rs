//! Sequential processing stages.

use async_trait::async_trait;

use crate::block::PageData;
use crate::error::RenderError;

/// One stage of a processing chain.
///
/// A stage finishes its own work before handing the updated record to the
/// next stage; forwarding is strictly sequential. `process` takes `&mut self`,
/// so one stage instance never runs two cycles at once.
#[async_trait]
pub trait Chain: Send + Sync {
    /// Stage name used to prefix errors and log lines.
    fn name(&self) -> &str;

    /// Processes `data` and returns the record produced by the end of the chain.
    async fn process(&mut self, data: PageData) -> Result<PageData, RenderError>;
}

#[async_trait]
impl<C: Chain + ?Sized> Chain for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn process(&mut self, data: PageData) -> Result<PageData, RenderError> {
        (**self).process(data).await
    }
}

/// Forwards `data` to `next` when present, otherwise returns it unchanged.
pub async fn forward(
    next: Option<&mut Box<dyn Chain>>,
    data: PageData,
) -> Result<PageData, RenderError> {
    match next {
        Some(next) => next.process(data).await,
        None => Ok(data),
    }
}
