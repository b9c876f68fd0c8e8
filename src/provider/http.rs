//! HTTP implementation of the provider gateway.
//!
//! Wire shapes live here and nowhere else. Creation defaults that are
//! provider-plan dependent (private networking, virtio) are applied in this
//! module rather than in core logic.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{
    CompletionReport, CompletionStatus, CompletionToken, GatewayFuture, ImageRecord, Instance,
    MachineRequest, ProviderError, ProviderGateway, RegionRecord, SizeRecord, SshKeyRecord,
};

/// Production control-plane endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.digitalocean.com";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway that talks to the provider's REST control plane.
#[derive(Clone, Debug)]
pub struct HttpProviderGateway {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpProviderGateway {
    /// Constructs a gateway using the default API endpoint.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_API_BASE)
    }

    /// Constructs a gateway against an explicit API endpoint. Used by tests
    /// and by deployments that front the control plane with a proxy.
    #[must_use]
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }
}

fn transport(err: reqwest::Error) -> ProviderError {
    ProviderError::Transport {
        message: err.to_string(),
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(|err| {
            ProviderError::Malformed {
                message: err.to_string(),
            }
        });
    }

    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| status.to_string());

    // 409 and 422 mark an event in flight on the instance; termination
    // retries these until the provider settles.
    if status.as_u16() == 409 || status.as_u16() == 422 {
        return Err(ProviderError::Conflict { message });
    }
    Err(ProviderError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn expect_no_content(response: reqwest::Response) -> Result<(), ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    // Reuse the JSON error path for the failure shapes.
    decode::<serde_json::Value>(response).await.map(|_| ())
}

#[derive(Deserialize)]
struct WireNetworkAddress {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Default, Deserialize)]
struct WireNetworks {
    #[serde(default)]
    v4: Vec<WireNetworkAddress>,
}

#[derive(Deserialize)]
struct WireDroplet {
    id: u64,
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    networks: WireNetworks,
}

impl WireDroplet {
    fn into_instance(self, token: Option<CompletionToken>) -> Instance {
        let ip_address = self
            .networks
            .v4
            .iter()
            .find(|addr| addr.kind == "public")
            .map(|addr| addr.ip_address.clone());
        Instance {
            id: self.id.to_string(),
            name: self.name,
            ip_address,
            status: self.status,
            created_at: self.created_at,
            completion_token: token,
        }
    }
}

#[derive(Deserialize)]
struct WireActionLink {
    id: u64,
}

#[derive(Default, Deserialize)]
struct WireLinks {
    #[serde(default)]
    actions: Vec<WireActionLink>,
}

#[derive(Deserialize)]
struct CreateResponse {
    droplet: WireDroplet,
    #[serde(default)]
    links: WireLinks,
}

#[derive(Deserialize)]
struct GetResponse {
    droplet: WireDroplet,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    droplets: Vec<WireDroplet>,
}

#[derive(Deserialize)]
struct WireAction {
    #[serde(default)]
    status: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Deserialize)]
struct ActionResponse {
    action: WireAction,
}

#[derive(Deserialize)]
struct WireSize {
    slug: String,
    memory: u64,
    vcpus: u64,
    disk: u64,
    // Reported in terabytes, fractional for the smallest plans.
    transfer: f64,
    price_monthly: f64,
}

impl WireSize {
    fn into_record(self) -> SizeRecord {
        SizeRecord {
            id: self.slug.clone(),
            name: self.slug,
            memory_mb: self.memory,
            cpus: self.vcpus,
            disk_gb: self.disk,
            transfer: whole_transfer(self.transfer),
            price_monthly: self.price_monthly,
        }
    }
}

/// Converts a fractional terabyte allowance to the whole units the
/// catalog compares against.
#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "clamped non-negative and floored before the cast"
)]
fn whole_transfer(transfer: f64) -> u64 {
    transfer.max(0.0).floor() as u64
}

#[derive(Deserialize)]
struct SizesResponse {
    #[serde(default)]
    sizes: Vec<WireSize>,
}

#[derive(Deserialize)]
struct WireRegion {
    slug: String,
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Deserialize)]
struct RegionsResponse {
    #[serde(default)]
    regions: Vec<WireRegion>,
}

#[derive(Deserialize)]
struct WireImage {
    id: u64,
    name: String,
    slug: Option<String>,
    #[serde(default)]
    distribution: String,
    #[serde(default)]
    public: bool,
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    images: Vec<WireImage>,
}

#[derive(Deserialize)]
struct WireSshKey {
    id: u64,
    name: String,
}

#[derive(Deserialize)]
struct SshKeysResponse {
    #[serde(default)]
    ssh_keys: Vec<WireSshKey>,
}

impl ProviderGateway for HttpProviderGateway {
    fn list_sizes(&self) -> GatewayFuture<'_, Vec<SizeRecord>> {
        Box::pin(async move {
            let body: SizesResponse = self.get_json("/v2/sizes?per_page=200").await?;
            Ok(body.sizes.into_iter().map(WireSize::into_record).collect())
        })
    }

    fn list_regions(&self) -> GatewayFuture<'_, Vec<RegionRecord>> {
        Box::pin(async move {
            let body: RegionsResponse = self.get_json("/v2/regions?per_page=200").await?;
            Ok(body
                .regions
                .into_iter()
                .map(|region| RegionRecord {
                    id: region.slug.clone(),
                    name: region.name,
                    slug: region.slug,
                    aliases: region.aliases,
                })
                .collect())
        })
    }

    fn list_images(&self) -> GatewayFuture<'_, Vec<ImageRecord>> {
        Box::pin(async move {
            let body: ImagesResponse = self
                .get_json("/v2/images?type=distribution&per_page=200")
                .await?;
            Ok(body
                .images
                .into_iter()
                .map(|image| ImageRecord {
                    id: image.id.to_string(),
                    name: image.name,
                    slug: image.slug,
                    distribution: image.distribution,
                    public: image.public,
                })
                .collect())
        })
    }

    fn list_ssh_keys(&self) -> GatewayFuture<'_, Vec<SshKeyRecord>> {
        Box::pin(async move {
            let body: SshKeysResponse = self.get_json("/v2/account/keys").await?;
            Ok(body
                .ssh_keys
                .into_iter()
                .map(|key| SshKeyRecord {
                    id: key.id.to_string(),
                    name: key.name,
                })
                .collect())
        })
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a MachineRequest,
    ) -> GatewayFuture<'a, Instance> {
        Box::pin(async move {
            request.validate()?;
            let body = serde_json::json!({
                "name": request.name,
                "region": request.region_id,
                "size": request.size_id,
                "image": request.image_id,
                "ssh_keys": request.ssh_key_ids,
                "user_data": request.user_data,
                "private_networking": true,
                "virtio": true,
            });
            let response = self
                .http
                .post(self.url("/v2/droplets"))
                .bearer_auth(&self.token)
                .json(&body)
                .send()
                .await
                .map_err(transport)?;
            let created: CreateResponse = decode(response).await?;
            let token = created
                .links
                .actions
                .first()
                .map(|action| CompletionToken::new(action.id.to_string()));
            Ok(created.droplet.into_instance(token))
        })
    }

    fn get_instance<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, Instance> {
        Box::pin(async move {
            let body: GetResponse = self.get_json(&format!("/v2/droplets/{id}")).await?;
            Ok(body.droplet.into_instance(None))
        })
    }

    fn list_instances(&self) -> GatewayFuture<'_, Vec<Instance>> {
        Box::pin(async move {
            let body: ListResponse = self.get_json("/v2/droplets?per_page=200").await?;
            Ok(body
                .droplets
                .into_iter()
                .map(|droplet| droplet.into_instance(None))
                .collect())
        })
    }

    fn poll_completion<'a>(
        &'a self,
        token: &'a CompletionToken,
    ) -> GatewayFuture<'a, CompletionReport> {
        Box::pin(async move {
            let body: ActionResponse = self
                .get_json(&format!("/v2/actions/{}", token.as_str()))
                .await?;
            let status = match body.action.status.as_str() {
                "completed" => CompletionStatus::Done,
                "errored" => CompletionStatus::Error,
                _ => CompletionStatus::Pending,
            };
            let diagnostic = match status {
                CompletionStatus::Error => Some(format!(
                    "action {} reported status {}",
                    token.as_str(),
                    body.action.status
                )),
                _ => None,
            };
            Ok(CompletionReport {
                status,
                kind: body.action.kind,
                diagnostic,
            })
        })
    }

    fn terminate_instance<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let response = self
                .http
                .delete(self.url(&format!("/v2/droplets/{id}")))
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(transport)?;
            expect_no_content(response).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_payload_accepts_fractional_transfer() {
        let body: SizesResponse = serde_json::from_str(
            r#"{"sizes":[{"slug":"512mb","memory":512,"vcpus":1,"disk":20,"transfer":0.5,"price_monthly":5.0}]}"#,
        )
        .unwrap_or_else(|err| panic!("decode failed: {err}"));

        let record = body
            .sizes
            .into_iter()
            .map(WireSize::into_record)
            .next()
            .unwrap_or_else(|| panic!("payload held no sizes"));
        assert_eq!(record.id, "512mb");
        assert_eq!(record.transfer, 0);
    }

    #[test]
    fn whole_transfer_keeps_whole_units() {
        assert_eq!(whole_transfer(6.0), 6);
        assert_eq!(whole_transfer(-1.0), 0);
    }
}
