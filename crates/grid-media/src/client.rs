use async_trait::async_trait;
use chrono::Utc;
use grid_core::{
    Error, ImageData, ImageId, ImageSource, LeaseId, MediaApi, MediaConfig, NewLease, Result,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

/// Header carrying the API key.
const API_KEY_HEADER: &str = "X-Gu-Media-Key";

/// Client for the media API (images, metadata, archive flag) and the leases API.
pub struct MediaApiClient {
    /// HTTP client for API requests.
    client: Client,
    /// Media API base URL without trailing slash.
    api_base_url: String,
    /// Leases API base URL without trailing slash.
    leases_base_url: String,
    /// Optional API key.
    api_key: Option<String>,
}

/// Envelope used by the media API for single resources.
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    /// Wrapped resource.
    data: T,
}

/// Body for writes that replace a single value.
#[derive(Debug, Serialize)]
struct DataBody<'value, T: ?Sized> {
    /// Value being written.
    data: &'value T,
}

/// Response returned when a lease is created.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedLease {
    /// Id assigned by the leases API.
    lease_id: LeaseId,
}

impl MediaApiClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &MediaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            leases_base_url: config.leases_url().trim_end_matches('/').to_owned(),
            api_key: config.api_key(),
        })
    }

    fn image_url(&self, image_id: &ImageId) -> String {
        format!("{}/images/{image_id}", self.api_base_url)
    }

    fn metadata_url(&self, image_id: &ImageId, field: &str) -> String {
        format!("{}/metadata/{field}", self.image_url(image_id))
    }

    fn archived_url(&self, image_id: &ImageId) -> String {
        format!("{}/user-metadata/archived", self.image_url(image_id))
    }

    fn leases_url(&self) -> String {
        format!("{}/leases", self.leases_base_url)
    }

    fn lease_url(&self, lease_id: &LeaseId) -> String {
        format!("{}/leases/{lease_id}", self.leases_base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    /// Turns non-success statuses into errors.
    async fn check(response: Response, resource: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(resource.to_owned()));
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_owned());
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ImageSource for MediaApiClient {
    async fn fetch_image(&self, image_id: &ImageId) -> Result<ImageData> {
        let url = self.image_url(image_id);
        tracing::trace!("GET {url}");

        let response = self.authorized(self.client.get(&url)).send().await?;
        let envelope: DataEnvelope<ImageData> =
            Self::check(response, &url).await?.json().await?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl MediaApi for MediaApiClient {
    async fn put_metadata_field(&self, image_id: &ImageId, field: &str, value: &str) -> Result<()> {
        let url = self.metadata_url(image_id, field);
        tracing::debug!("PUT {url}");

        let response = self
            .authorized(self.client.put(&url))
            .json(&DataBody { data: value })
            .send()
            .await?;
        Self::check(response, &url).await?;
        Ok(())
    }

    async fn set_archived(&self, image_id: &ImageId, archived: bool) -> Result<()> {
        let url = self.archived_url(image_id);
        tracing::debug!("PUT {url} archived={archived}");

        let response = self
            .authorized(self.client.put(&url))
            .json(&DataBody { data: &archived })
            .send()
            .await?;
        Self::check(response, &url).await?;
        Ok(())
    }

    async fn create_lease(&self, image_id: &ImageId, lease: &NewLease) -> Result<LeaseId> {
        let url = self.leases_url();
        tracing::debug!("POST {url} for image {image_id}");

        let body = lease.for_image(image_id, Utc::now());
        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        let created: CreatedLease = Self::check(response, &url).await?.json().await?;
        Ok(created.lease_id)
    }

    async fn delete_lease(&self, lease_id: &LeaseId) -> Result<()> {
        let url = self.lease_url(lease_id);
        tracing::debug!("DELETE {url}");

        let response = self.authorized(self.client.delete(&url)).send().await?;
        Self::check(response, &url).await?;
        Ok(())
    }
}
