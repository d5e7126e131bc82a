//! Legacy update-check responder
//!
//! A short-lived HTTP server that answers the legacy engine's XML update
//! check with exactly the artifacts it was started with, and serves only
//! those files.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use xmltree::Element;

use crate::config;
use crate::download::file_digests;
use crate::error::{Result, UpdateError};
use crate::utils::file_name_of;
use crate::{log_debug, log_error, log_info, log_warn};

const MODULE: &str = "server";

/// Event type the engine sends once the update is applied
const EVENT_UPDATE_COMPLETE: u32 = 14;

const RESPONSE_OK: &str = r#"<?xml version='1.0' encoding='UTF-8'?>
<response protocol="3.0" server="prod">
	<daystart elapsed_seconds="42548" elapsed_days="5179"/>
	<app status="ok" appid="{98DA7DF2-4E3E-4744-9DE6-EC931886ABAB}">
		<event status="ok"/>
		<ping status="ok"/>
	</app>
</response>
"#;

/// One artifact the responder is allowed to hand out
#[derive(Debug, Clone)]
pub struct UpdateOffer {
    /// Platform string the device reports in `<os platform=..>`
    pub platform: String,
    pub version: String,
    pub file_name: String,
    pub path: PathBuf,
    /// Base64 SHA-1
    pub sha1: String,
    /// Base64 SHA-256
    pub sha256: String,
    pub size: u64,
}

impl UpdateOffer {
    /// Describe a local update file. The platform comes from a vendor-style
    /// file name (`<version>_<product>-<id>.signed`) when possible.
    pub fn from_file(path: &Path, version: &str, fallback_platform: &str) -> Result<Self> {
        let file_name = file_name_of(path);
        let platform = parse_vendor_file_name(&file_name)
            .map(|(_, product)| product)
            .unwrap_or_else(|| fallback_platform.to_string());

        let (sha1, sha256, size) = file_digests(path)?;
        log_debug!(
            MODULE,
            "Offer {} for {} ({} bytes)",
            file_name,
            platform,
            size
        );

        Ok(Self {
            platform,
            version: version.to_string(),
            file_name,
            path: path.to_path_buf(),
            sha1: BASE64.encode(sha1),
            sha256: BASE64.encode(sha256),
            size,
        })
    }
}

/// Split `<version>_<product>-<id>.signed` into version and product
pub fn parse_vendor_file_name(name: &str) -> Option<(String, String)> {
    let (version, rest) = name.split_once('_')?;
    if rest.contains('_') {
        return None;
    }
    let (stem, extension) = rest.split_once('.')?;
    if extension.contains('.') {
        return None;
    }
    let product = stem.split('-').next()?;
    if version.is_empty() || product.is_empty() {
        return None;
    }
    Some((version.to_string(), product.to_string()))
}

struct ResponderState {
    offers: HashMap<String, UpdateOffer>,
    base_url: String,
}

/// Running responder. Dropping it without [`UpdateResponder::stop`] leaves
/// the task running until the runtime shuts down.
pub struct UpdateResponder {
    base_url: String,
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl UpdateResponder {
    /// Bind `bind` and advertise `http://<advertised_host>:<port>/` as the
    /// download base
    pub async fn start(
        bind: SocketAddr,
        advertised_host: &str,
        offers: Vec<UpdateOffer>,
    ) -> Result<Self> {
        if offers.is_empty() {
            return Err(UpdateError::NotFound {
                url: "no update files to serve".to_string(),
            });
        }

        let listener = TcpListener::bind(bind).await.map_err(|e| {
            log_error!(MODULE, "Could not bind {}: {}", bind, e);
            UpdateError::Transport(format!(
                "Could not start the update server on {} (is the port already in use?): {}",
                bind, e
            ))
        })?;
        let local_addr = listener.local_addr()?;
        let base_url = format!("http://{}:{}/", advertised_host, local_addr.port());

        let state = Arc::new(ResponderState {
            offers: offers
                .into_iter()
                .map(|offer| (offer.platform.clone(), offer))
                .collect(),
            base_url: base_url.clone(),
        });

        let app = Router::new()
            .route("/updates/:name", get(serve_update))
            .fallback(handle_request)
            .with_state(state);

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                log_error!(MODULE, "Update server stopped with error: {}", e);
            }
        });

        log_info!(MODULE, "Update server listening on {} as {}", local_addr, base_url);
        Ok(Self {
            base_url,
            local_addr,
            shutdown,
            handle,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
        log_debug!(MODULE, "Update server stopped");
    }
}

async fn serve_update(
    State(state): State<Arc<ResponderState>>,
    UrlPath(name): UrlPath<String>,
) -> Response {
    let Some(offer) = state.offers.values().find(|o| o.file_name == name) else {
        log_warn!(MODULE, "Refusing request for unknown file {}", name);
        return StatusCode::NOT_FOUND.into_response();
    };

    let file = match tokio::fs::File::open(&offer.path).await {
        Ok(file) => file,
        Err(e) => {
            log_error!(MODULE, "Cannot open {}: {}", offer.path.display(), e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    log_info!(MODULE, "Serving {} to device", offer.file_name);
    let stream = futures_util::stream::unfold(Some(file), |file| async move {
        let mut file = file?;
        let mut buffer = vec![0u8; config::download::CHUNK_SIZE * 8];
        match file.read(&mut buffer).await {
            Ok(0) => None,
            Ok(n) => {
                buffer.truncate(n);
                Some((Ok::<_, std::io::Error>(Bytes::from(buffer)), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    });

    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, offer.size.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn handle_request(
    State(state): State<Arc<ResponderState>>,
    method: Method,
    body: String,
) -> Response {
    if method != Method::POST {
        return StatusCode::NOT_FOUND.into_response();
    }

    let request = match Element::parse(body.as_bytes()) {
        Ok(request) => request,
        Err(e) => {
            log_warn!(MODULE, "Malformed update request: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let Some(app) = request.get_child("app") else {
        log_warn!(MODULE, "Update request without <app>");
        return StatusCode::BAD_REQUEST.into_response();
    };

    if app.get_child("updatecheck").is_some() {
        return answer_update_check(&state, &request, app);
    }

    match app.get_child("event") {
        Some(event) => answer_event(event),
        None => {
            log_warn!(MODULE, "Update request without <updatecheck> or <event>");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

fn answer_update_check(state: &ResponderState, request: &Element, app: &Element) -> Response {
    let Some(platform) = request
        .get_child("os")
        .and_then(|os| os.attributes.get("platform"))
    else {
        log_warn!(MODULE, "Update check without <os platform>");
        return StatusCode::BAD_REQUEST.into_response();
    };

    log_info!(
        MODULE,
        "Update check from {} running {}",
        platform,
        app.attributes
            .get("version")
            .map(String::as_str)
            .unwrap_or("unknown")
    );

    let Some(offer) = state.offers.get(platform) else {
        log_warn!(MODULE, "No update registered for platform {}", platform);
        return StatusCode::NOT_FOUND.into_response();
    };

    (
        [(header::CONTENT_TYPE, "text/xml")],
        render_update_check(offer, &state.base_url),
    )
        .into_response()
}

fn answer_event(event: &Element) -> Response {
    let attribute = |name: &str| -> Option<u32> {
        event.attributes.get(name).and_then(|v| v.trim().parse().ok())
    };
    let event_type = attribute("eventtype");
    let event_result = attribute("eventresult");

    if event_result != Some(0) {
        log_info!(MODULE, "Update downloaded, waiting for the device to install it");
        if let Some(code) = event.attributes.get("errorcode") {
            log_info!(MODULE, "Event reported error code {}", code);
        }
        return StatusCode::OK.into_response();
    }

    if event_type == Some(EVENT_UPDATE_COMPLETE) {
        log_info!(MODULE, "Device reported the update as installed");
        return ([(header::CONTENT_TYPE, "text/xml")], RESPONSE_OK).into_response();
    }

    log_debug!(MODULE, "Acknowledging event {:?}", event_type);
    StatusCode::OK.into_response()
}

fn render_update_check(offer: &UpdateOffer, base_url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
 <response protocol="3.0" server="prod">
	<daystart elapsed_seconds="37145" elapsed_days="5179"/>
	<app status="ok" appid="{{98DA7DF2-4E3E-4744-9DE6-EC931886ABAB}}">
		<event status="ok"/>
		<updatecheck status="ok">
			<urls>
				<url codebase="{codebase}"/>
			</urls>
			<manifest version="{version}">
				<packages>
					<package required="true" hash="{sha1}" name="updates/{name}" size="{size}"/>
				</packages>
				<actions>
					<action successsaction="default" sha256="{sha256}" event="postinstall" DisablePayloadBackoff="true"/>
				</actions>
			</manifest>
		</updatecheck>
		<ping status="ok"/>
	</app>
</response>
"#,
        codebase = base_url,
        version = offer.version,
        sha1 = offer.sha1,
        name = offer.file_name,
        size = offer.size,
        sha256 = offer.sha256,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;
    use tempfile::TempDir;

    const FILE_NAME: &str = "2.15.1.1189_reMarkable2-7fd7a0ab.signed";

    fn update_check(platform: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<request protocol="3.0" version="1.0.0" ismachine="1">
  <os platform="{platform}" version="zg" sp="2.10.3.379_armv7l"/>
  <app appid="{{98DA7DF2-4E3E-4744-9DE6-EC931886ABAB}}" version="2.10.3.379" track="Prod" bootid="{{00000000}}">
    <updatecheck/>
  </app>
</request>"#
        )
    }

    fn event(event_type: u32, result: u32) -> String {
        format!(
            r#"<request protocol="3.0"><os platform="reMarkable2"/><app appid="x" version="2.10.3.379"><event eventtype="{event_type}" eventresult="{result}"/></app></request>"#
        )
    }

    async fn start(dir: &TempDir, body: &[u8]) -> UpdateResponder {
        let path = dir.path().join(FILE_NAME);
        std::fs::write(&path, body).unwrap();
        let offer = UpdateOffer::from_file(&path, "2.15.1.1189", "reMarkable").unwrap();
        UpdateResponder::start("127.0.0.1:0".parse().unwrap(), "127.0.0.1", vec![offer])
            .await
            .unwrap()
    }

    #[test]
    fn test_parse_vendor_file_name() {
        assert_eq!(
            parse_vendor_file_name(FILE_NAME),
            Some(("2.15.1.1189".to_string(), "reMarkable2".to_string()))
        );
        assert_eq!(parse_vendor_file_name("firmware.swu"), None);
        assert_eq!(parse_vendor_file_name("a_b_c.signed"), None);
    }

    #[test]
    fn test_offer_platform_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.signed");
        std::fs::write(&path, b"abc").unwrap();

        let offer = UpdateOffer::from_file(&path, "2.15.1.1189", "reMarkable").unwrap();
        assert_eq!(offer.platform, "reMarkable");
        assert_eq!(offer.size, 3);
        assert_eq!(offer.sha1, "qZk+NkcGgWq6PiVxeFDCbJzQ2J0=");
        assert_eq!(offer.sha256, "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0=");
    }

    #[tokio::test]
    async fn test_update_check_response() {
        let dir = TempDir::new().unwrap();
        let responder = start(&dir, b"firmware-bytes").await;
        let url = responder.base_url().to_string();

        let response = Client::new()
            .post(&url)
            .body(update_check("reMarkable2"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let text = response.text().await.unwrap();

        assert!(text.contains(&format!(r#"<url codebase="{}"/>"#, url)));
        assert!(text.contains(r#"<manifest version="2.15.1.1189">"#));
        assert!(text.contains(&format!(r#"name="updates/{}""#, FILE_NAME)));
        assert!(text.contains(r#"size="14""#));
        assert!(text.contains(r#"appid="{98DA7DF2-4E3E-4744-9DE6-EC931886ABAB}""#));

        responder.stop().await;
    }

    #[tokio::test]
    async fn test_serves_only_registered_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();
        let responder = start(&dir, b"firmware-bytes").await;
        let url = responder.base_url().to_string();
        let client = Client::new();

        let body = client
            .get(format!("{}updates/{}", url, FILE_NAME))
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(&body[..], b"firmware-bytes");

        for path in ["updates/secret.txt", "secret.txt", FILE_NAME] {
            let status = client
                .get(format!("{}{}", url, path))
                .send()
                .await
                .unwrap()
                .status();
            assert_eq!(status, 404, "{}", path);
        }

        responder.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_platform_is_not_found() {
        let dir = TempDir::new().unwrap();
        let responder = start(&dir, b"firmware-bytes").await;

        let status = Client::new()
            .post(responder.base_url())
            .body(update_check("ferrari"))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, 404);

        responder.stop().await;
    }

    #[tokio::test]
    async fn test_event_acknowledgements() {
        let dir = TempDir::new().unwrap();
        let responder = start(&dir, b"firmware-bytes").await;
        let client = Client::new();

        let done = client
            .post(responder.base_url())
            .body(event(14, 0))
            .send()
            .await
            .unwrap();
        assert_eq!(done.status(), 200);
        assert_eq!(done.text().await.unwrap(), RESPONSE_OK);

        let progress = client
            .post(responder.base_url())
            .body(event(13, 1))
            .send()
            .await
            .unwrap();
        assert_eq!(progress.status(), 200);
        assert!(progress.text().await.unwrap().is_empty());

        let malformed = client
            .post(responder.base_url())
            .body("<request")
            .send()
            .await
            .unwrap();
        assert_eq!(malformed.status(), 400);

        responder.stop().await;
    }

    #[tokio::test]
    async fn test_start_without_offers_fails() {
        let result =
            UpdateResponder::start("127.0.0.1:0".parse().unwrap(), "127.0.0.1", Vec::new()).await;
        assert!(matches!(result, Err(UpdateError::NotFound { .. })));
    }
}
