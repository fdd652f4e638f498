use async_trait::async_trait;

use keel_common::Result;

use super::{Target, TargetKind};

/// Applies changes through the cloud API held in the task context
#[derive(Clone, Copy, Debug, Default)]
pub struct ApiTarget;

impl ApiTarget {
    /// New API target
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Target for ApiTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::Api
    }

    fn process_deletions(&self) -> bool {
        true
    }

    async fn finish(&self) -> Result<()> {
        Ok(())
    }
}
