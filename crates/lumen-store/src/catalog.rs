//! Remote catalog retrieval.
//!
//! A content source publishes one directory per language containing
//! `metadata.json`, `playlists.json` and `assets.json`. The three documents
//! are combined into a single [`CatalogSnapshot`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{Asset, CatalogSnapshot, ItemSource, Playlist, StoreError};

/// Retrieves the immutable catalog for a content source.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    /// Fetch the catalog published at `base_url` for `language`.
    ///
    /// Returns `None` on any transport failure or malformed payload.
    async fn fetch(&self, base_url: &str, language: &str) -> Option<CatalogSnapshot>;
}

/// [`CatalogFetcher`] reading the published JSON documents over HTTP.
pub struct HttpCatalogFetcher {
    http: Client,
}

impl HttpCatalogFetcher {
    pub fn new() -> Result<Self, StoreError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { http })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, StoreError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::InvalidResponse(format!(
                "GET {} returned {}",
                url, status
            )));
        }
        Ok(response.json().await?)
    }

    async fn fetch_documents(
        &self,
        base_url: &str,
        language: &str,
    ) -> Result<CatalogSnapshot, StoreError> {
        let root = format!("{}/{}", base_url.trim_end_matches('/'), language);

        let metadata_url = format!("{}/metadata.json", root);
        let playlists_url = format!("{}/playlists.json", root);
        let assets_url = format!("{}/assets.json", root);

        let (metadata, playlists, assets) = tokio::join!(
            self.get_json::<CatalogSnapshot>(&metadata_url),
            self.get_json::<Vec<Playlist>>(&playlists_url),
            self.get_json::<Vec<Asset>>(&assets_url),
        );

        let mut snapshot = metadata?;
        snapshot.playlists = playlists?;
        snapshot.assets = assets?;

        // Whatever the documents claim, these are catalog mirrors.
        for playlist in &mut snapshot.playlists {
            playlist.source = ItemSource::Catalog;
        }
        for asset in &mut snapshot.assets {
            asset.source = ItemSource::Catalog;
        }

        Ok(snapshot)
    }
}

#[async_trait]
impl CatalogFetcher for HttpCatalogFetcher {
    async fn fetch(&self, base_url: &str, language: &str) -> Option<CatalogSnapshot> {
        match self.fetch_documents(base_url, language).await {
            Ok(snapshot) => {
                debug!(
                    base_url,
                    language,
                    categories = snapshot.categories.len(),
                    playlists = snapshot.playlists.len(),
                    assets = snapshot.assets.len(),
                    "fetched catalog"
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!(base_url, language, error = %e, "catalog fetch failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount(server: &MockServer, route: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_combines_documents() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/en-us/metadata.json",
            serde_json::json!({
                "schemaVersion": "v4",
                "categories": [{ "id": "A", "name": "Getting started",
                                 "subCategories": [{ "id": "A1", "name": "Basics" }] }],
                "technologies": [{ "id": "T1", "name": "Word", "subjects": [] }],
                "supportedLanguages": ["en-us", "fr-fr"],
                "telemetryKey": "key",
                "assetOrigins": ["https://docs.example.com"]
            }),
        )
        .await;
        mount(
            &server,
            "/en-us/playlists.json",
            serde_json::json!([{ "id": "P1", "title": "Intro", "categoryId": "A1", "source": "tenant" }]),
        )
        .await;
        mount(
            &server,
            "/en-us/assets.json",
            serde_json::json!([{ "id": "X1", "title": "Video", "url": "https://docs.example.com/x1" }]),
        )
        .await;

        let fetcher = HttpCatalogFetcher::new().unwrap();
        let snapshot = fetcher
            .fetch(&format!("{}/", server.uri()), "en-us")
            .await
            .unwrap();

        assert_eq!(snapshot.schema_version, "v4");
        assert_eq!(snapshot.categories[0].sub_categories[0].id, "A1");
        assert_eq!(snapshot.supported_languages, vec!["en-us", "fr-fr"]);
        assert_eq!(snapshot.playlists.len(), 1);
        assert_eq!(snapshot.playlists[0].source, ItemSource::Catalog);
        assert_eq!(snapshot.assets[0].id, "X1");
    }

    #[tokio::test]
    async fn test_fetch_missing_document_is_none() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/fr-fr/metadata.json",
            serde_json::json!({ "schemaVersion": "v4" }),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/fr-fr/playlists.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount(&server, "/fr-fr/assets.json", serde_json::json!([])).await;

        let fetcher = HttpCatalogFetcher::new().unwrap();
        assert!(fetcher.fetch(&server.uri(), "fr-fr").await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_malformed_payload_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/en-us/metadata.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;
        mount(&server, "/en-us/playlists.json", serde_json::json!([])).await;
        mount(&server, "/en-us/assets.json", serde_json::json!([])).await;

        let fetcher = HttpCatalogFetcher::new().unwrap();
        assert!(fetcher.fetch(&server.uri(), "en-us").await.is_none());
    }
}
