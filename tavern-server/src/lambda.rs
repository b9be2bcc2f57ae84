//! Asynchronous invocation of the transcription/summary function

use async_trait::async_trait;
use aws_sdk_lambda::error::DisplayErrorContext;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use aws_sdk_lambda::Client;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvokeError(pub String);

#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    /// Queue an `Event` invocation; returns the status code the service reported
    async fn invoke_event(&self, payload: Vec<u8>) -> Result<i32, InvokeError>;
}

pub struct LambdaInvoker {
    client: Client,
    function_name: String,
}

impl LambdaInvoker {
    pub fn new(client: Client, function_name: impl Into<String>) -> Self {
        Self {
            client,
            function_name: function_name.into(),
        }
    }

    pub async fn from_env(region: &str, function_name: impl Into<String>) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::new(Client::new(&config), function_name)
    }
}

#[async_trait]
impl FunctionInvoker for LambdaInvoker {
    async fn invoke_event(&self, payload: Vec<u8>) -> Result<i32, InvokeError> {
        let output = self
            .client
            .invoke()
            .function_name(&self.function_name)
            .invocation_type(InvocationType::Event)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|e| {
                let message = DisplayErrorContext(&e).to_string();
                tracing::error!(function = %self.function_name, "Lambda invoke failed: {}", message);
                InvokeError(message)
            })?;

        if let Some(error) = output.function_error() {
            return Err(InvokeError(format!("Function error: {}", error)));
        }
        Ok(output.status_code())
    }
}

/// Logs the payload instead of invoking anything; used when no function is configured
pub struct LoggingInvoker;

#[async_trait]
impl FunctionInvoker for LoggingInvoker {
    async fn invoke_event(&self, payload: Vec<u8>) -> Result<i32, InvokeError> {
        tracing::info!(
            payload = %String::from_utf8_lossy(&payload),
            "No processing function configured; skipping invocation"
        );
        Ok(202)
    }
}
