//! Provider gateway abstraction for instance lifecycle calls.
//!
//! The gateway owns every control-plane interaction with the cloud provider:
//! catalog listings, instance creation, completion polling, and termination.
//! Historical differences between provider API shapes live behind this trait;
//! core logic never branches on an API version.

mod http;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

pub use http::{DEFAULT_API_BASE, HttpProviderGateway};

/// Parameters required to create one instance.
///
/// Created by a command, consumed exactly once by a lifecycle operation.
#[derive(Clone, Debug, PartialEq)]
pub struct MachineRequest {
    /// Name assigned to the instance.
    pub name: String,
    /// Provider image identifier for the boot disk.
    pub image_id: String,
    /// Provider size identifier selected by the constraint solver.
    pub size_id: String,
    /// Provider region identifier selected by the constraint solver.
    pub region_id: String,
    /// SSH key identifiers installed on first boot.
    pub ssh_key_ids: Vec<String>,
    /// Optional user-data payload applied on first boot.
    pub user_data: Option<String>,
}

impl MachineRequest {
    /// Starts a builder for a [`MachineRequest`].
    #[must_use]
    pub fn builder() -> MachineRequestBuilder {
        MachineRequestBuilder::default()
    }

    /// Validates the request, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when any required field is empty.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.name.is_empty() {
            return Err(ProviderError::Validation("name".to_owned()));
        }
        if self.image_id.is_empty() {
            return Err(ProviderError::Validation("image_id".to_owned()));
        }
        if self.size_id.is_empty() {
            return Err(ProviderError::Validation("size_id".to_owned()));
        }
        if self.region_id.is_empty() {
            return Err(ProviderError::Validation("region_id".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`MachineRequest`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MachineRequestBuilder {
    name: String,
    image_id: String,
    size_id: String,
    region_id: String,
    ssh_key_ids: Vec<String>,
    user_data: Option<String>,
}

impl MachineRequestBuilder {
    /// Sets the instance name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the image identifier.
    #[must_use]
    pub fn image_id(mut self, value: impl Into<String>) -> Self {
        self.image_id = value.into();
        self
    }

    /// Sets the size identifier.
    #[must_use]
    pub fn size_id(mut self, value: impl Into<String>) -> Self {
        self.size_id = value.into();
        self
    }

    /// Sets the region identifier.
    #[must_use]
    pub fn region_id(mut self, value: impl Into<String>) -> Self {
        self.region_id = value.into();
        self
    }

    /// Sets the SSH key identifiers.
    #[must_use]
    pub fn ssh_key_ids(mut self, value: Vec<String>) -> Self {
        self.ssh_key_ids = value;
        self
    }

    /// Sets the optional user-data payload.
    #[must_use]
    pub fn user_data(mut self, value: Option<String>) -> Self {
        self.user_data = value;
        self
    }

    /// Builds and validates the [`MachineRequest`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<MachineRequest, ProviderError> {
        let request = MachineRequest {
            name: self.name.trim().to_owned(),
            image_id: self.image_id.trim().to_owned(),
            size_id: self.size_id.trim().to_owned(),
            region_id: self.region_id.trim().to_owned(),
            ssh_key_ids: self.ssh_key_ids,
            user_data: self.user_data,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Opaque provider handle used to poll for asynchronous completion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompletionToken(String);

impl CompletionToken {
    /// Wraps a raw token value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Completion state reported by the provider for an asynchronous operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompletionStatus {
    /// The operation is still in flight.
    Pending,
    /// The operation finished successfully.
    Done,
    /// The provider reported the operation as failed.
    Error,
}

/// One poll of a completion token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompletionReport {
    /// Completion state of the polled operation.
    pub status: CompletionStatus,
    /// Event kind the token refers to (for example `create`).
    pub kind: String,
    /// Provider-supplied diagnostic, if any.
    pub diagnostic: Option<String>,
}

/// A provider-side virtual machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Provider-assigned identifier.
    pub id: String,
    /// Instance name.
    pub name: String,
    /// Public IPv4 address, once assigned.
    pub ip_address: Option<String>,
    /// Status string reported by the provider.
    pub status: String,
    /// Creation timestamp as reported by the provider.
    pub created_at: String,
    /// Completion token for the creation event, when still relevant.
    pub completion_token: Option<CompletionToken>,
}

/// A machine size offered by the provider. Disk figures are provider-reported
/// gigabytes; the catalog normalises them to megabytes at load time.
#[derive(Clone, Debug, PartialEq)]
pub struct SizeRecord {
    /// Size identifier used in create requests.
    pub id: String,
    /// Human readable name (for example `8GB`).
    pub name: String,
    /// Memory in megabytes.
    pub memory_mb: u64,
    /// Number of virtual CPUs.
    pub cpus: u64,
    /// Root disk in gigabytes, as reported by the provider.
    pub disk_gb: u64,
    /// Monthly transfer allowance in whole terabytes.
    pub transfer: u64,
    /// Monthly price used for cheapest-first ordering.
    pub price_monthly: f64,
}

/// A placement region offered by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegionRecord {
    /// Region identifier used in create requests.
    pub id: String,
    /// Human readable name (for example `New York 1`).
    pub name: String,
    /// Short slug (for example `nyc1`).
    pub slug: String,
    /// Alternative names accepted in constraints.
    pub aliases: Vec<String>,
}

/// A boot image offered by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageRecord {
    /// Image identifier used in create requests.
    pub id: String,
    /// Image name.
    pub name: String,
    /// Stable slug (for example `ubuntu-24-04-x64`), when published.
    pub slug: Option<String>,
    /// Distribution name (for example `Ubuntu`).
    pub distribution: String,
    /// Whether the image is publicly available.
    pub public: bool,
}

/// An SSH public key registered with the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshKeyRecord {
    /// Key identifier passed in create requests.
    pub id: String,
    /// Key name.
    pub name: String,
}

/// Errors raised by provider gateways.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ProviderError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Non-2xx control-plane response that is not retryable.
    #[error("provider API error ({status}): {message}")]
    Api {
        /// HTTP status returned by the provider.
        status: u16,
        /// Message extracted from the error body, when present.
        message: String,
    },
    /// The instance has an event in flight; the caller may retry shortly.
    #[error("provider reports a pending event: {message}")]
    Conflict {
        /// Message extracted from the conflict response.
        message: String,
    },
    /// Network-level failure reaching the control plane.
    #[error("provider transport error: {message}")]
    Transport {
        /// Human-readable transport failure description.
        message: String,
    },
    /// A 2xx response whose body did not match the expected shape.
    #[error("malformed provider response: {message}")]
    Malformed {
        /// Description of the decoding failure.
        message: String,
    },
}

impl ProviderError {
    /// Returns `true` when the error is the retryable pending-event conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Future returned by gateway operations.
pub type GatewayFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Control-plane interface implemented by provider gateways.
///
/// Implementations must be safe to share across the runner's workers.
pub trait ProviderGateway: Send + Sync {
    /// Lists the machine sizes the provider offers.
    fn list_sizes(&self) -> GatewayFuture<'_, Vec<SizeRecord>>;

    /// Lists the placement regions the provider offers.
    fn list_regions(&self) -> GatewayFuture<'_, Vec<RegionRecord>>;

    /// Lists the boot images the provider offers.
    fn list_images(&self) -> GatewayFuture<'_, Vec<ImageRecord>>;

    /// Lists the SSH keys registered with the provider.
    fn list_ssh_keys(&self) -> GatewayFuture<'_, Vec<SshKeyRecord>>;

    /// Creates an instance. The returned [`Instance`] carries the completion
    /// token used to poll creation progress.
    fn create_instance<'a>(&'a self, request: &'a MachineRequest)
    -> GatewayFuture<'a, Instance>;

    /// Fetches a single instance by identifier.
    fn get_instance<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, Instance>;

    /// Lists the currently active instances.
    fn list_instances(&self) -> GatewayFuture<'_, Vec<Instance>>;

    /// Polls an asynchronous completion token.
    fn poll_completion<'a>(
        &'a self,
        token: &'a CompletionToken,
    ) -> GatewayFuture<'a, CompletionReport>;

    /// Terminates an instance. Idempotent; a pending-event condition is
    /// surfaced as [`ProviderError::Conflict`] so callers can retry.
    fn terminate_instance<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_trims_and_validates() {
        let request = MachineRequest::builder()
            .name(" staging-0 ")
            .image_id("img-1")
            .size_id("1gb")
            .region_id("nyc1")
            .ssh_key_ids(vec![String::from("k1")])
            .build()
            .unwrap_or_else(|err| panic!("build failed: {err}"));

        assert_eq!(request.name, "staging-0");
        assert_eq!(request.ssh_key_ids, vec![String::from("k1")]);
    }

    #[test]
    fn builder_rejects_missing_size() {
        let result = MachineRequest::builder()
            .name("staging-0")
            .image_id("img-1")
            .region_id("nyc1")
            .build();

        assert!(
            matches!(result, Err(ProviderError::Validation(ref field)) if field == "size_id"),
            "unexpected outcome: {result:?}"
        );
    }
}
