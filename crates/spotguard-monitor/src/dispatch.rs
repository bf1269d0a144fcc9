use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::DisplayErrorContext;
use spotguard_core::StopRequest;
use spotguard_core::imds::{ImdsClient, ImdsError};

/// Where stop requests go. The orchestrator on the other side stops the
/// instance; nothing here waits for that to happen.
#[async_trait]
pub trait StopQueue: Send + Sync {
    async fn send(&self, request: &StopRequest) -> anyhow::Result<()>;
}

/// Names the instance a stop request is for. Resolved at dispatch time so a
/// metadata outage only delays the request, never the idle count.
#[async_trait]
pub trait InstanceIdentity: Send + Sync {
    async fn instance_id(&self) -> anyhow::Result<String>;
}

#[async_trait]
impl<T: InstanceIdentity + ?Sized> InstanceIdentity for Box<T> {
    async fn instance_id(&self) -> anyhow::Result<String> {
        (**self).instance_id().await
    }
}

#[derive(Debug, Clone)]
pub struct FixedIdentity(pub String);

#[async_trait]
impl InstanceIdentity for FixedIdentity {
    async fn instance_id(&self) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug)]
pub struct MetadataIdentity {
    imds: ImdsClient,
    base: String,
}

impl MetadataIdentity {
    pub fn new(base: String, timeout: std::time::Duration) -> Result<Self, ImdsError> {
        Ok(Self {
            imds: ImdsClient::for_base(&base, timeout)?,
            base,
        })
    }
}

#[async_trait]
impl InstanceIdentity for MetadataIdentity {
    async fn instance_id(&self) -> anyhow::Result<String> {
        let id = self
            .imds
            .instance_id(&self.base)
            .await
            .context("get instance id from metadata service")?;
        if id.is_empty() {
            anyhow::bail!("metadata service returned an empty instance id");
        }
        Ok(id)
    }
}

#[derive(Debug, Clone)]
pub struct SqsStopQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsStopQueue {
    /// Loads AWS credentials from the default provider chain.
    pub async fn load(queue_url: String, region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let sdk = loader.load().await;
        Self {
            client: aws_sdk_sqs::Client::new(&sdk),
            queue_url,
        }
    }
}

#[async_trait]
impl StopQueue for SqsStopQueue {
    async fn send(&self, request: &StopRequest) -> anyhow::Result<()> {
        let body = request.to_json().context("serialize stop request")?;
        let out = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body.clone())
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("send SQS message: {}", DisplayErrorContext(&e)))?;
        tracing::info!(
            queue_url = %self.queue_url,
            message_id = out.message_id().unwrap_or_default(),
            %body,
            "stop request sent"
        );
        Ok(())
    }
}
