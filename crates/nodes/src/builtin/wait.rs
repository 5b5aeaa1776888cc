//! `wait`: sleep for a number of seconds.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::de::Scalar;
use crate::traits::parse_config;
use crate::{kinds, ExecutableNode, ExecutionContext, NodeError, NodeOutput};

#[derive(Debug, Deserialize)]
struct WaitConfig {
    #[serde(default, alias = "duration")]
    seconds: Option<Scalar>,
}

impl WaitConfig {
    /// A missing duration waits zero seconds.
    fn duration(&self) -> Result<Duration, NodeError> {
        match &self.seconds {
            None => Ok(Duration::ZERO),
            Some(raw) => raw.as_duration().ok_or_else(|| {
                NodeError::config(format!(
                    "wait seconds must be a non-negative number of seconds, got {raw:?}"
                ))
            }),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct WaitNode;

#[async_trait]
impl ExecutableNode for WaitNode {
    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        let cfg: WaitConfig = parse_config(kinds::WAIT, config)?;
        match &cfg.seconds {
            Some(Scalar::Text(text)) if text.contains("{{") => Ok(()),
            _ => cfg.duration().map(|_| ()),
        }
    }

    async fn execute(
        &self,
        config: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let cfg: WaitConfig = parse_config(kinds::WAIT, config)?;
        let duration = cfg.duration()?;
        let seconds = duration.as_secs_f64();
        debug!(seconds, "waiting");
        tokio::time::sleep(duration).await;
        Ok(NodeOutput::new(json!({ "waited": seconds })))
    }
}
