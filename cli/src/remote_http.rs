use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use tracing::debug;

use macrotrack_core::remote::{
    DocumentPath, EntryDocument, GoalsDocument, RemoteEntry, RemoteStore,
};

/// `RemoteStore` backed by a `macrotrack serve` instance.
pub struct HttpRemote {
    client: reqwest::Client,
    base: Url,
    api_key: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("Invalid remote URL: {base_url}"))?;
        if base.cannot_be_a_base() || base.host_str().is_none() {
            bail!("Invalid remote URL: {base_url}");
        }
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "macrotrack/{} (macro tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base,
            api_key,
        })
    }

    /// Host and port the connectivity probe should dial.
    pub fn host_port(&self) -> Option<(String, u16)> {
        Some((
            self.base.host_str()?.to_string(),
            self.base.port_or_known_default()?,
        ))
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("Remote URL cannot hold a path: {}", self.base))?
            .pop_if_empty()
            .push("v1")
            .push("users")
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.authorize(request)
            .send()
            .await
            .with_context(|| format!("Failed to reach remote at {}", self.base))
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("Remote returned {status}: {}", body.trim())
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn get_goals(&self, principal: &str) -> Result<Option<GoalsDocument>> {
        DocumentPath::goals(principal)?;
        let url = self.url(&[principal, "data", "goals"])?;
        debug!(%url, "fetching goals");
        let response = self.send(self.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc = check(response)
            .await?
            .json()
            .await
            .context("Failed to parse goals document")?;
        Ok(Some(doc))
    }

    async fn set_goals(&self, principal: &str, doc: &GoalsDocument) -> Result<()> {
        DocumentPath::goals(principal)?;
        let url = self.url(&[principal, "data", "goals"])?;
        check(self.send(self.client.put(url).json(doc)).await?).await?;
        Ok(())
    }

    async fn list_entries(&self, principal: &str) -> Result<Vec<RemoteEntry>> {
        DocumentPath::entries(principal)?;
        let url = self.url(&[principal, "entries"])?;
        debug!(%url, "listing entries");
        check(self.send(self.client.get(url)).await?)
            .await?
            .json()
            .await
            .context("Failed to parse entry list")
    }

    async fn set_entry(&self, principal: &str, id: &str, doc: &EntryDocument) -> Result<()> {
        DocumentPath::entry(principal, id)?;
        let url = self.url(&[principal, "entries", id])?;
        check(self.send(self.client.put(url).json(doc)).await?).await?;
        Ok(())
    }

    async fn delete_entry(&self, principal: &str, id: &str) -> Result<()> {
        DocumentPath::entry(principal, id)?;
        let url = self.url(&[principal, "entries", id])?;
        let response = self.send(self.client.delete(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response).await?;
        Ok(())
    }
}

/// Stand-in used when no remote URL has been configured. Every call fails,
/// so mutations stay local and report as unsynced.
pub struct Unconfigured;

const UNCONFIGURED: &str = "No remote configured. Run `macrotrack remote set <url>` first";

#[async_trait]
impl RemoteStore for Unconfigured {
    async fn get_goals(&self, _principal: &str) -> Result<Option<GoalsDocument>> {
        bail!(UNCONFIGURED)
    }

    async fn set_goals(&self, _principal: &str, _doc: &GoalsDocument) -> Result<()> {
        bail!(UNCONFIGURED)
    }

    async fn list_entries(&self, _principal: &str) -> Result<Vec<RemoteEntry>> {
        bail!(UNCONFIGURED)
    }

    async fn set_entry(&self, _principal: &str, _id: &str, _doc: &EntryDocument) -> Result<()> {
        bail!(UNCONFIGURED)
    }

    async fn delete_entry(&self, _principal: &str, _id: &str) -> Result<()> {
        bail!(UNCONFIGURED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{AppState, build_router};
    use chrono::{TimeZone, Utc};
    use macrotrack_core::remote::MemoryRemote;
    use std::sync::Arc;

    const ENTRY_ID: &str = "5f0e3c1a-2b7d-4e8f-9a6b-1c2d3e4f5a6b";

    async fn spawn_server(api_key: Option<&str>) -> String {
        let app = build_router(AppState::new(
            Arc::new(MemoryRemote::in_memory()),
            api_key.map(str::to_string),
        ));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn entry_doc() -> EntryDocument {
        EntryDocument {
            user_id: "alice".to_string(),
            date: Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap(),
            meal_type: "dinner".to_string(),
            food_name: "Salmon".to_string(),
            carbs: 0.0,
            protein: 25.0,
            fat: 12.0,
            calories: Some(208.0),
            barcode: None,
            created_at: Utc.with_ymd_and_hms(2024, 6, 15, 19, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_url_building() {
        let remote = HttpRemote::new("http://example.com:9000/base/", None).unwrap();
        let url = remote.url(&["alice", "entries", ENTRY_ID]).unwrap();
        assert_eq!(
            url.as_str(),
            format!("http://example.com:9000/base/v1/users/alice/entries/{ENTRY_ID}")
        );
        assert_eq!(
            remote.host_port(),
            Some(("example.com".to_string(), 9000))
        );
    }

    #[test]
    fn test_default_port_from_scheme() {
        let remote = HttpRemote::new("https://sync.example.org", None).unwrap();
        assert_eq!(
            remote.host_port(),
            Some(("sync.example.org".to_string(), 443))
        );
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(HttpRemote::new("not a url", None).is_err());
        assert!(HttpRemote::new("mailto:someone@example.com", None).is_err());
    }

    #[tokio::test]
    async fn test_round_trip_against_server() {
        let base = spawn_server(Some("k3y")).await;
        let remote = HttpRemote::new(&base, Some("k3y".to_string())).unwrap();

        assert!(remote.get_goals("alice").await.unwrap().is_none());

        let goals = GoalsDocument {
            carbs: 200.0,
            protein: 150.0,
            fat: 70.0,
            updated_at: Utc.with_ymd_and_hms(2024, 6, 15, 8, 0, 0).unwrap(),
        };
        remote.set_goals("alice", &goals).await.unwrap();
        assert_eq!(remote.get_goals("alice").await.unwrap(), Some(goals));

        remote.set_entry("alice", ENTRY_ID, &entry_doc()).await.unwrap();
        let listed = remote.list_entries("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, ENTRY_ID);
        assert_eq!(listed[0].data, entry_doc());

        remote.delete_entry("alice", ENTRY_ID).await.unwrap();
        remote.delete_entry("alice", ENTRY_ID).await.unwrap();
        assert!(remote.list_entries("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_key_is_an_error() {
        let base = spawn_server(Some("right")).await;
        let remote = HttpRemote::new(&base, Some("wrong".to_string())).unwrap();
        let err = remote.list_entries("alice").await.unwrap_err();
        assert!(format!("{err:#}").contains("401"));
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let remote = HttpRemote::new(&format!("http://{addr}"), None).unwrap();
        let err = remote.get_goals("alice").await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to reach remote"));
    }

    #[tokio::test]
    async fn test_unconfigured_always_fails() {
        let err = Unconfigured.list_entries("alice").await.unwrap_err();
        assert!(err.to_string().contains("macrotrack remote set"));
        assert!(Unconfigured.delete_entry("alice", ENTRY_ID).await.is_err());
    }
}
