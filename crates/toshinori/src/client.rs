//! Supabase REST, auth and storage client.

use crate::error::{ToshinoriError, ToshinoriResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

/// PostgREST query parameters, e.g. `("sender_id", "eq.abc")`.
pub type Query = Vec<(&'static str, String)>;

/// Thin HTTP wrapper around one Supabase project.
///
/// Every call carries the project `apikey` and the caller's bearer token.
#[derive(Clone)]
pub struct SupabaseClient {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
}

impl SupabaseClient {
    /// Create a new Supabase client.
    ///
    /// # Arguments
    /// * `api_url` - The Supabase project API URL (e.g., `https://xyz.supabase.co`)
    /// * `anon_key` - The Supabase publishable API key
    /// * `timeout` - Per-request timeout; an expired request fails with `Http`
    pub fn new(
        api_url: impl Into<String>,
        anon_key: impl Into<String>,
        timeout: Duration,
    ) -> ToshinoriResult<Self> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        if api_url.is_empty() {
            return Err(ToshinoriError::Config("empty Supabase URL".to_string()));
        }
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            api_url,
            anon_key: anon_key.into(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Build the REST API URL for a table.
    pub(crate) fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, table)
    }

    pub(crate) fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.api_url, function)
    }

    pub(crate) fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.api_url, bucket, path)
    }

    /// Public URL of an object in a public bucket.
    pub fn public_object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.api_url, bucket, path)
    }

    fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
        access_token: &str,
    ) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
    }

    // =========================================================================
    // HTTP helpers
    // =========================================================================

    /// GET rows from a table.
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
        access_token: &str,
    ) -> ToshinoriResult<Vec<T>> {
        let response = self
            .authorized(self.http_client.get(self.rest_url(table)), access_token)
            .query(query)
            .send()
            .await?;

        self.parse_json(response).await
    }

    /// POST rows and return the stored representation.
    pub async fn insert<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
        access_token: &str,
    ) -> ToshinoriResult<Vec<T>> {
        let response = self
            .authorized(self.http_client.post(self.rest_url(table)), access_token)
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;

        self.parse_json(response).await
    }

    /// PATCH rows matching `query` and return the updated representation.
    pub async fn patch<B: Serialize, T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
        body: &B,
        access_token: &str,
    ) -> ToshinoriResult<Vec<T>> {
        let response = self
            .authorized(self.http_client.patch(self.rest_url(table)), access_token)
            .query(query)
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;

        self.parse_json(response).await
    }

    /// DELETE rows matching `query`. Returns the deleted representation.
    pub async fn delete<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
        access_token: &str,
    ) -> ToshinoriResult<Vec<T>> {
        let response = self
            .authorized(self.http_client.delete(self.rest_url(table)), access_token)
            .query(query)
            .header("Prefer", "return=representation")
            .send()
            .await?;

        self.parse_json(response).await
    }

    /// Call a Postgres function through PostgREST.
    pub async fn rpc<B: Serialize, T: DeserializeOwned>(
        &self,
        function: &str,
        args: &B,
        access_token: &str,
    ) -> ToshinoriResult<T> {
        let response = self
            .authorized(self.http_client.post(self.rpc_url(function)), access_token)
            .header("Content-Type", "application/json")
            .json(args)
            .send()
            .await?;

        self.parse_json(response).await
    }

    /// Resolve the user behind an access token.
    pub async fn get_user<T: DeserializeOwned>(&self, access_token: &str) -> ToshinoriResult<T> {
        let url = format!("{}/auth/v1/user", self.api_url);
        let response = self
            .authorized(self.http_client.get(url), access_token)
            .send()
            .await?;

        self.parse_json(response).await
    }

    /// Upload an object. Existing objects are never overwritten.
    pub async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
        access_token: &str,
    ) -> ToshinoriResult<()> {
        debug!(bucket, path, size = bytes.len(), "Uploading object to Supabase storage");

        let response = self
            .authorized(
                self.http_client.post(self.object_url(bucket, path)),
                access_token,
            )
            .header(
                "Content-Type",
                content_type.unwrap_or("application/octet-stream"),
            )
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;

        self.check_response(response).await?;
        Ok(())
    }

    /// Check HTTP response for errors.
    async fn check_response(
        &self,
        response: reqwest::Response,
    ) -> ToshinoriResult<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!("Supabase request failed: {} - {}", status, body);
            return Err(ToshinoriError::Supabase {
                status,
                message: body,
            });
        }
        Ok(response)
    }

    async fn parse_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> ToshinoriResult<T> {
        let response = self.check_response(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SupabaseClient {
        SupabaseClient::new(
            "https://test.supabase.co/",
            "test-key",
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn test_client_creation_trims_trailing_slash() {
        let client = client();
        assert_eq!(client.api_url(), "https://test.supabase.co");
        assert_eq!(client.anon_key, "test-key");
    }

    #[test]
    fn test_empty_url_is_rejected() {
        let result = SupabaseClient::new("", "key", Duration::from_secs(1));
        assert!(matches!(result, Err(ToshinoriError::Config(_))));
    }

    #[test]
    fn test_urls() {
        let client = client();
        assert_eq!(
            client.rest_url("chat_messages"),
            "https://test.supabase.co/rest/v1/chat_messages"
        );
        assert_eq!(
            client.rpc_url("get_conversation_participants"),
            "https://test.supabase.co/rest/v1/rpc/get_conversation_participants"
        );
        assert_eq!(
            client.public_object_url("documents", "chat_files/u1/1.pdf"),
            "https://test.supabase.co/storage/v1/object/public/documents/chat_files/u1/1.pdf"
        );
    }

    #[test]
    fn test_debug_hides_key() {
        let rendered = format!("{:?}", client());
        assert!(rendered.contains("test.supabase.co"));
        assert!(!rendered.contains("test-key"));
    }
}
