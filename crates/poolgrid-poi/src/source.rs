//! Where points of interest come from.
//!
//! `WordPressSource` reads posts of one category from a WordPress REST API
//! and turns their custom fields (`acf.lat`, `acf.lon`, `acf.image`) into
//! [`PointOfInterest`] records. Image fields holding a media id are
//! resolved to the media item's `source_url` with one extra request each.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, HOST, USER_AGENT};
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tracing::{debug, info, warn};

use poolgrid_core::PoiConfig;
use poolgrid_state::PointOfInterest;

use crate::error::{PoiError, PoiResult};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A read-only supplier of points of interest.
pub trait PoiSource: Send + Sync {
    /// Every point of interest the source currently publishes.
    fn fetch_all(&self) -> BoxFuture<'_, PoiResult<Vec<PointOfInterest>>>;

    /// Whether the source is answering requests.
    fn ping(&self) -> BoxFuture<'_, bool>;
}

/// Per-request timeout for WordPress calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts requested per call; WordPress caps `per_page` at 100.
const PAGE_SIZE: u32 = 100;

pub struct WordPressSource {
    /// `host:port` to connect to.
    address: String,
    /// Value of the `Host` header.
    host: String,
    /// Path prefix the WordPress install lives under (no trailing slash).
    base_path: String,
    category: u32,
    timeout: Duration,
}

impl WordPressSource {
    /// Build a source for a plain `http://host[:port][/path]` base URL.
    pub fn new(base_url: &str, category: u32) -> PoiResult<Self> {
        let uri: Uri = base_url
            .parse()
            .map_err(|e| PoiError::InvalidUrl(format!("{base_url}: {e}")))?;
        match uri.scheme_str() {
            None | Some("http") => {}
            Some(other) => {
                return Err(PoiError::InvalidUrl(format!(
                    "{base_url}: unsupported scheme {other}"
                )));
            }
        }
        let authority = uri
            .authority()
            .ok_or_else(|| PoiError::InvalidUrl(format!("{base_url}: missing host")))?;
        let address = match authority.port_u16() {
            Some(port) => format!("{}:{port}", authority.host()),
            None => format!("{}:80", authority.host()),
        };

        Ok(Self {
            address,
            host: authority.to_string(),
            base_path: uri.path().trim_end_matches('/').to_string(),
            category,
            timeout: REQUEST_TIMEOUT,
        })
    }

    /// The configured source, or `None` when no base URL is set.
    pub fn from_config(config: &PoiConfig) -> PoiResult<Option<Self>> {
        config
            .base_url
            .as_deref()
            .map(|url| Self::new(url, config.category))
            .transpose()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn posts_path(&self) -> String {
        format!(
            "{}/wp-json/wp/v2/posts?categories={}&per_page={PAGE_SIZE}",
            self.base_path, self.category
        )
    }

    pub fn media_path(&self, media_id: u64) -> String {
        format!("{}/wp-json/wp/v2/media/{media_id}", self.base_path)
    }

    /// GET `path` over a fresh HTTP/1 connection.
    async fn get(&self, path: &str) -> PoiResult<(StatusCode, Bytes)> {
        let url = format!("http://{}{path}", self.host);
        let http_err = |reason: String| PoiError::Http {
            url: url.clone(),
            reason,
        };

        let request = async {
            let stream = tokio::net::TcpStream::connect(&self.address)
                .await
                .map_err(|e| http_err(e.to_string()))?;
            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| http_err(e.to_string()))?;

            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "wordpress connection closed with error");
                }
            });

            let req = Request::builder()
                .method(Method::GET)
                .uri(path)
                .header(HOST, &self.host)
                .header(USER_AGENT, "poolgrid-poi/0.1")
                .header(ACCEPT, "application/json")
                .body(Empty::<Bytes>::new())
                .map_err(|e| http_err(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| http_err(e.to_string()))?;
            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| http_err(e.to_string()))?
                .to_bytes();
            Ok((status, body))
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| PoiError::Timeout(self.timeout))?
    }

    async fn get_json(&self, path: &str) -> PoiResult<Value> {
        let (status, body) = self.get(path).await?;
        let url = format!("http://{}{path}", self.host);
        if !status.is_success() {
            return Err(PoiError::Status {
                url,
                status: status.as_u16(),
            });
        }
        serde_json::from_slice(&body).map_err(|e| PoiError::Decode {
            url,
            reason: e.to_string(),
        })
    }

    async fn media_url(&self, media_id: u64) -> PoiResult<Option<String>> {
        let media = self.get_json(&self.media_path(media_id)).await?;
        Ok(media
            .get("source_url")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    pub async fn fetch(&self) -> PoiResult<Vec<PointOfInterest>> {
        let path = self.posts_path();
        debug!(host = %self.host, %path, "fetching posts");
        let posts = self.get_json(&path).await?;
        let entries = parse_posts(&posts).map_err(|reason| PoiError::Decode {
            url: format!("http://{}{path}", self.host),
            reason,
        })?;

        let mut pois = Vec::with_capacity(entries.len());
        for entry in entries {
            let image = match entry.image {
                Some(ImageRef::Url(url)) => Some(url),
                Some(ImageRef::Media(media_id)) => match self.media_url(media_id).await {
                    Ok(url) => url,
                    Err(e) => {
                        warn!(poi = entry.id, media_id, error = %e, "image lookup failed");
                        None
                    }
                },
                None => None,
            };
            pois.push(PointOfInterest {
                id: entry.id,
                lat: entry.lat,
                lon: entry.lon,
                image,
            });
        }
        info!(count = pois.len(), category = self.category, "fetched points of interest");
        Ok(pois)
    }
}

impl PoiSource for WordPressSource {
    fn fetch_all(&self) -> BoxFuture<'_, PoiResult<Vec<PointOfInterest>>> {
        Box::pin(self.fetch())
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            match self.get(&self.posts_path()).await {
                Ok((status, _)) => status.is_success(),
                Err(e) => {
                    debug!(error = %e, "wordpress not answering");
                    false
                }
            }
        })
    }
}

/// Poll `source` every `poll` until it answers or `timeout` elapses.
pub async fn wait_ready(source: &dyn PoiSource, timeout: Duration, poll: Duration) -> PoiResult<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if source.ping().await {
            info!("poi source is up");
            return Ok(());
        }
        if tokio::time::Instant::now() + poll > deadline {
            return Err(PoiError::Timeout(timeout));
        }
        info!("waiting for poi source");
        tokio::time::sleep(poll).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ImageRef {
    Media(u64),
    Url(String),
}

#[derive(Debug, Clone, PartialEq)]
struct PostEntry {
    id: u64,
    lat: f64,
    lon: f64,
    image: Option<ImageRef>,
}

/// Extract POI fields from a posts listing. Posts without custom fields or
/// without both coordinates are skipped.
fn parse_posts(posts: &Value) -> Result<Vec<PostEntry>, String> {
    let posts = posts
        .as_array()
        .ok_or_else(|| "posts response is not an array".to_string())?;

    let mut entries = Vec::with_capacity(posts.len());
    for post in posts {
        let Some(id) = post.get("id").and_then(Value::as_u64) else {
            warn!("post without numeric id skipped");
            continue;
        };
        // WordPress renders empty custom fields as `[]` or `false`.
        let Some(acf) = post.get("acf").and_then(Value::as_object) else {
            debug!(post = id, "post without custom fields skipped");
            continue;
        };
        let (Some(lat), Some(lon)) = (coordinate(acf.get("lat")), coordinate(acf.get("lon"))) else {
            warn!(post = id, "post without coordinates skipped");
            continue;
        };
        let image = match acf.get("image") {
            Some(Value::Number(n)) => n.as_u64().map(ImageRef::Media),
            Some(Value::String(s)) if !s.trim().is_empty() => Some(match s.trim().parse::<u64>() {
                Ok(media_id) => ImageRef::Media(media_id),
                Err(_) => ImageRef::Url(s.trim().to_string()),
            }),
            _ => None,
        };
        entries.push(PostEntry { id, lat, lon, image });
    }
    Ok(entries)
}

/// Custom fields arrive as numbers or numeric strings.
fn coordinate(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use axum::extract::{Path, Query};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fake_wordpress() -> Router {
        Router::new()
            .route(
                "/wp-json/wp/v2/posts",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    assert_eq!(q.get("categories").map(String::as_str), Some("3"));
                    assert_eq!(q.get("per_page").map(String::as_str), Some("100"));
                    Json(json!([
                        {"id": 1, "acf": {"lat": 48.85, "lon": 2.35, "image": 7}},
                        {"id": 2, "acf": {"lat": "51.5", "lon": "-0.12", "image": 8}},
                        {"id": 3, "acf": []},
                        {"id": 4, "acf": {"lat": 1.0}},
                        {"id": 5, "acf": {"lat": 0, "lon": 0, "image": "https://cdn/x.png"}}
                    ]))
                }),
            )
            .route(
                "/wp-json/wp/v2/media/{id}",
                get(|Path(id): Path<u64>| async move {
                    if id == 7 {
                        Ok(Json(json!({"id": 7, "source_url": "http://wp/img/7.jpg"})))
                    } else {
                        Err(AxumStatus::NOT_FOUND)
                    }
                }),
            )
    }

    #[test]
    fn new_accepts_plain_http() {
        let src = WordPressSource::new("http://wordpress", 3).unwrap();
        assert_eq!(src.address, "wordpress:80");
        assert_eq!(src.posts_path(), "/wp-json/wp/v2/posts?categories=3&per_page=100");

        let src = WordPressSource::new("http://cms.local:8080/blog/", 9).unwrap();
        assert_eq!(src.address, "cms.local:8080");
        assert_eq!(src.host, "cms.local:8080");
        assert_eq!(src.media_path(4), "/blog/wp-json/wp/v2/media/4");
    }

    #[test]
    fn new_rejects_tls_and_garbage() {
        assert!(matches!(
            WordPressSource::new("https://wordpress", 3),
            Err(PoiError::InvalidUrl(_))
        ));
        assert!(matches!(
            WordPressSource::new("not a url", 3),
            Err(PoiError::InvalidUrl(_))
        ));
    }

    #[test]
    fn from_config_without_url_is_none() {
        assert!(WordPressSource::from_config(&PoiConfig::default()).unwrap().is_none());
    }

    #[test]
    fn parse_posts_skips_incomplete_entries() {
        let posts = json!([
            {"id": 1, "acf": {"lat": 1.5, "lon": "2.5", "image": "12"}},
            {"id": 2, "acf": false},
            {"acf": {"lat": 1, "lon": 2}},
            {"id": 3, "acf": {"lat": 1, "lon": 2, "image": ""}}
        ]);
        let entries = parse_posts(&posts).unwrap();
        assert_eq!(
            entries,
            vec![
                PostEntry { id: 1, lat: 1.5, lon: 2.5, image: Some(ImageRef::Media(12)) },
                PostEntry { id: 3, lat: 1.0, lon: 2.0, image: None },
            ]
        );
        assert!(parse_posts(&json!({"code": "rest_no_route"})).is_err());
    }

    #[tokio::test]
    async fn fetch_resolves_media_and_tolerates_missing_images() {
        let base = serve(fake_wordpress()).await;
        let source = WordPressSource::new(&base, 3).unwrap();

        let pois = source.fetch_all().await.unwrap();
        assert_eq!(
            pois,
            vec![
                PointOfInterest { id: 1, lat: 48.85, lon: 2.35, image: Some("http://wp/img/7.jpg".to_string()) },
                PointOfInterest { id: 2, lat: 51.5, lon: -0.12, image: None },
                PointOfInterest { id: 5, lat: 0.0, lon: 0.0, image: Some("https://cdn/x.png".to_string()) },
            ]
        );
        assert!(source.ping().await);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let base = serve(Router::new()).await;
        let source = WordPressSource::new(&base, 3).unwrap();
        let err = source.fetch_all().await.unwrap_err();
        assert!(matches!(err, PoiError::Status { status: 404, .. }));
        assert!(!source.ping().await);
    }

    #[tokio::test]
    async fn unreachable_source_is_not_ready() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = WordPressSource::new(&format!("http://{addr}"), 3).unwrap();
        assert!(!source.ping().await);
        let err = wait_ready(&source, Duration::from_millis(30), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, PoiError::Timeout(_)));
    }

    #[tokio::test]
    async fn wait_ready_returns_once_source_answers() {
        let base = serve(fake_wordpress()).await;
        let source = WordPressSource::new(&base, 3).unwrap();
        wait_ready(&source, Duration::from_secs(5), Duration::from_millis(10))
            .await
            .unwrap();
    }
}
