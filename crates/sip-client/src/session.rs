//! Authenticated ingest session: token lifecycle, entity lookup and
//! mutation, and streaming package upload.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use url::Url;

use crate::entity::{Entity, IdentifiedEntity};
use crate::error::{IngestError, Result};
use crate::xml;

const HEADER_ACCESS_TOKEN: &str = "Preservica-Access-Token";
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct Tokens {
    access: String,
    refresh: String,
}

/// Credentials the session was opened with, retained only for the
/// initial login; the background refresher rotates tokens from then on.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub host: String,
    pub tenant: String,
    pub username: String,
    pub password: String,
}

/// A scoped, authenticated handle to the preservation service's entity
/// API, with a background task that rotates the access token.
///
/// Every request reads the current token under a lock (so a refresh
/// happening concurrently with an outgoing request never races the
/// header read/write), and `close` must run to completion before the
/// session is considered released: it revokes the token and waits for
/// the background refresher to stop.
pub struct IngestSession {
    client: reqwest::Client,
    host: Url,
    tokens: Arc<RwLock<Tokens>>,
    shutdown: Arc<Notify>,
    refresher: Option<JoinHandle<()>>,
}

impl IngestSession {
    /// Log in and start the background token refresher. `refresh_interval`
    /// defaults to 600s when `None`.
    pub async fn connect(credentials: Credentials, refresh_interval: Option<Duration>) -> Result<Self> {
        let client = reqwest::Client::new();
        let host = Url::parse(&credentials.host)?;

        let login_url = host.join("/api/accesstoken/login")?;
        let response = client
            .post(login_url)
            .query(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
                ("tenant", credentials.tenant.as_str()),
            ])
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status, "login failed");
            return Err(IngestError::AuthFailed { status, body });
        }

        let body = response.text().await?;
        let (access, refresh) = xml::parse_token_pair(&body, "accesstoken/login")?;
        tracing::info!("authenticated session established");

        let tokens = Arc::new(RwLock::new(Tokens { access, refresh }));
        let shutdown = Arc::new(Notify::new());
        let interval = refresh_interval.unwrap_or(DEFAULT_REFRESH_INTERVAL);

        let refresher = tokio::spawn(run_refresher(
            client.clone(),
            host.clone(),
            tokens.clone(),
            shutdown.clone(),
            interval,
        ));

        Ok(Self {
            client,
            host,
            tokens,
            shutdown,
            refresher: Some(refresher),
        })
    }

    async fn current_token(&self) -> String {
        self.tokens.read().await.access.clone()
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.host.join(path).map_err(IngestError::from)
    }

    async fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header(HEADER_ACCESS_TOKEN, self.current_token().await)
    }

    /// Resolve an identifier to the entities carrying it.
    pub async fn get_objects_by_id(
        &self,
        value: &str,
        type_: Option<&str>,
    ) -> Result<Vec<IdentifiedEntity>> {
        let path = "/api/entity/entities/by-identifier";
        let url = self.url(path)?;
        let request = self
            .client
            .get(url)
            .query(&[("type", type_.unwrap_or("code")), ("value", value)]);
        let request = self.authed(request).await;
        let response = request.send().await?;

        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            tracing::error!(status, path, "by-identifier lookup failed");
            return Err(IngestError::Http { path: path.to_string(), status });
        }

        let body = response.text().await?;
        xml::parse_by_identifier(&body, path)
    }

    /// Fetch one entity document by its API URI.
    pub async fn get_object(&self, uri: &str) -> Result<Option<Entity>> {
        let request = self.authed(self.client.get(uri)).await;
        let response = request.send().await?;

        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            tracing::error!(status, uri, "entity fetch failed");
            return Ok(None);
        }

        let body = response.text().await?;
        Ok(Some(xml::parse_entity(&body, uri)?))
    }

    /// Recursively resolve an entity's `children_uri` collection.
    pub async fn get_children(&self, entity: &Entity) -> Result<Vec<Entity>> {
        let Some(children_uri) = &entity.children_uri else {
            return Ok(Vec::new());
        };
        let request = self.authed(self.client.get(children_uri.as_str())).await;
        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            tracing::error!(status, uri = %children_uri, "children fetch failed");
            return Ok(Vec::new());
        }
        let body = response.text().await?;
        let child_uris = xml::parse_children_uris(&body, children_uri)?;

        let mut children = Vec::with_capacity(child_uris.len());
        for uri in child_uris {
            if let Some(child) = self.get_object(&uri).await? {
                children.push(child);
            }
        }
        Ok(children)
    }

    /// Append a new metadata fragment to an entity.
    pub async fn post_metadata(&self, entity: &Entity, xml_fragment: &str) -> Result<()> {
        let path = format!("{}/metadata", entity.uri);
        let request = self
            .authed(self.client.post(path.as_str()))
            .await
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(xml::wrap_metadata_fragment(xml_fragment));
        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            tracing::error!(status, path, "post_metadata failed");
            return Err(IngestError::Http { path, status });
        }
        tracing::info!(entity = %entity.ref_, "posted metadata fragment");
        Ok(())
    }

    /// Replace an existing metadata fragment in place at its URI.
    pub async fn replace_metadata(&self, fragment_uri: &str, xml_fragment: &str) -> Result<()> {
        let request = self
            .authed(self.client.put(fragment_uri))
            .await
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(xml::wrap_metadata_fragment(xml_fragment));
        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            tracing::error!(status, fragment_uri, "replace_metadata failed");
            return Err(IngestError::Http {
                path: fragment_uri.to_string(),
                status,
            });
        }
        tracing::info!(fragment_uri, "replaced metadata fragment");
        Ok(())
    }

    /// Mutate a single field of an entity's XIP envelope and PUT it back.
    pub async fn update_xipmeta(&self, entity: &Entity, tag: &str, text: &str) -> Result<()> {
        let envelope = format!(
            "<XIP xmlns=\"http://preservica.com/XIP/v6.0\"><Ref>{}</Ref><{tag}>{text}</{tag}></XIP>",
            entity.ref_,
        );
        let request = self
            .authed(self.client.put(entity.uri.as_str()))
            .await
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(envelope);
        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            tracing::error!(status, uri = %entity.uri, "update_xipmeta failed");
            return Err(IngestError::Http {
                path: entity.uri.clone(),
                status,
            });
        }
        tracing::info!(entity = %entity.ref_, tag, "updated XIP envelope field");
        Ok(())
    }

    /// Upsert the extended-XIP temporal-coverage fragment: replace the
    /// first existing fragment of that schema if present, else post a new one.
    pub async fn update_extended_xip(
        &self,
        entity: &Entity,
        earliest: &str,
        latest: &str,
        surrogate: bool,
    ) -> Result<()> {
        const SCHEMA: &str = "http://preservica.com/ExtendedXIP/v6.0";
        let fragment = format!(
            "<ExtendedXIP xmlns=\"{SCHEMA}\"><DigitalSurrogate>{}</DigitalSurrogate>\
<CoverageFrom>{earliest}</CoverageFrom><CoverageTo>{latest}</CoverageTo></ExtendedXIP>",
            if surrogate { "true" } else { "false" },
        );

        if let Some(existing) = entity.metadata.iter().find(|m| m.schema_uri == SCHEMA) {
            self.replace_metadata(&existing.uri, &fragment).await
        } else {
            self.post_metadata(entity, &fragment).await
        }
    }

    /// Stream a package file to the destination structural object,
    /// returning the elapsed transfer duration on success.
    pub async fn upload(&self, filepath: impl AsRef<Path>, target_ref: &str) -> Result<Duration> {
        let filepath = filepath.as_ref();
        let filename = filepath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = format!("/api/entity/structural-objects/{target_ref}/upload-package");
        let url = {
            let mut u = self.url(&path)?;
            u.query_pairs_mut().append_pair("filename", &filename);
            u
        };

        let file = tokio::fs::File::open(filepath).await?;
        let stream = tokio_util::io::ReaderStream::new(file);
        let body = reqwest::Body::wrap_stream(stream);

        let started = std::time::Instant::now();
        let request = self
            .authed(self.client.post(url))
            .await
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);
        let response = request.send().await?;
        let elapsed = started.elapsed();

        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            tracing::error!(status, target_ref, filename, "package upload failed");
            return Err(IngestError::Http { path, status });
        }

        tracing::info!(target_ref, filename, elapsed_ms = elapsed.as_millis() as u64, "package uploaded");
        Ok(elapsed)
    }

    /// Revoke the current access token and stop the background
    /// refresher. Does not return until the refresher has exited.
    pub async fn close(mut self) -> Result<()> {
        let token = self.current_token().await;
        let revoke_url = self.url("/api/accesstoken/revoke")?;
        let response = self
            .client
            .post(revoke_url)
            .query(&[("access-token", token.as_str())])
            .send()
            .await;

        match response {
            Ok(r) if r.status() == StatusCode::OK => tracing::info!("access token revoked"),
            Ok(r) => tracing::error!(status = r.status().as_u16(), "token revoke failed"),
            Err(e) => tracing::error!(error = %e, "token revoke request failed"),
        }

        self.shutdown.notify_one();
        if let Some(handle) = self.refresher.take() {
            let _ = handle.await;
        }
        Ok(())
    }
}

async fn run_refresher(
    client: reqwest::Client,
    host: Url,
    tokens: Arc<RwLock<Tokens>>,
    shutdown: Arc<Notify>,
    interval: Duration,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                tracing::debug!("token refresher stopping");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let refresh_token = tokens.read().await.refresh.clone();
        let refresh_url = match host.join("/api/accesstoken/refresh") {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(error = %e, "failed to build refresh url");
                continue;
            }
        };

        let result = client
            .post(refresh_url)
            .query(&[("refreshToken", refresh_token.as_str())])
            .send()
            .await;

        match result {
            Ok(response) if response.status() == StatusCode::OK => match response.text().await {
                Ok(body) => match crate::xml::parse_token_pair(&body, "accesstoken/refresh") {
                    Ok((access, refresh)) => {
                        let mut guard = tokens.write().await;
                        guard.access = access;
                        guard.refresh = refresh;
                        tracing::info!("access token refreshed");
                    }
                    Err(e) => tracing::error!(error = %e, "malformed refresh response, retrying next interval"),
                },
                Err(e) => tracing::error!(error = %e, "failed to read refresh response body"),
            },
            Ok(response) => {
                tracing::error!(
                    status = response.status().as_u16(),
                    "token refresh failed, retrying next interval"
                );
            }
            Err(e) => tracing::error!(error = %e, "token refresh request failed, retrying next interval"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn login_body(token: &str, refresh: &str) -> String {
        format!(
            "<LoginResponse xmlns=\"http://preservica.com/AccessTokenAPI/v6.0\">\
<Token>{token}</Token><RefreshToken>{refresh}</RefreshToken></LoginResponse>"
        )
    }

    async fn connected_session(server: &MockServer) -> IngestSession {
        Mock::given(method("POST"))
            .and(path("/api/accesstoken/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(login_body("tok-0", "ref-0")))
            .mount(server)
            .await;

        IngestSession::connect(
            Credentials {
                host: server.uri(),
                tenant: "tenant".to_string(),
                username: "user".to_string(),
                password: "pass".to_string(),
            },
            Some(Duration::from_millis(30)),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn login_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/accesstoken/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let err = IngestSession::connect(
            Credentials {
                host: server.uri(),
                tenant: "t".into(),
                username: "u".into(),
                password: "p".into(),
            },
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IngestError::AuthFailed { status: 401, .. }));
    }

    #[tokio::test]
    async fn by_identifier_maps_short_kinds_to_plural_names() {
        let server = MockServer::start().await;
        let session = connected_session(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/entity/entities/by-identifier"))
            .and(query_param("value", "abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<EntitiesResponse xmlns="http://preservica.com/EntityAPI/v6.0">
                    <Entities>
                        <Entity><Type>IO</Type><Ref>r1</Ref><Title>a</Title><Uri>https://h/io/r1</Uri></Entity>
                        <Entity><Type>SO</Type><Ref>r2</Ref><Title>b</Title><Uri>https://h/so/r2</Uri></Entity>
                    </Entities>
                </EntitiesResponse>"#,
            ))
            .mount(&server)
            .await;

        let entities = session.get_objects_by_id("abc123", None).await.unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].kind.as_path_segment(), "information-objects");
        assert_eq!(entities[1].kind.as_path_segment(), "structural-objects");

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn token_refresh_rotates_header_across_intervals() {
        let server = MockServer::start().await;
        let session = connected_session(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/accesstoken/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string(login_body("tok-1", "ref-1")))
            .mount(&server)
            .await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(session.current_token().await, "tok-1");

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_revokes_token_and_stops_refresher() {
        let server = MockServer::start().await;
        let session = connected_session(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/accesstoken/revoke"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert!(session.refresher.is_some());
        session.close().await.unwrap();
    }
}
