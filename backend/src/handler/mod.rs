mod api;

use std::{path::Path, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::Response,
    routing, Router,
};
use chunkup_core::types::{UPLOAD_CHUNK_PATH, UPLOAD_PATH};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, services::ServeDir};

use crate::storage::ChunkStore;

#[derive(Clone)]
pub struct AppState {
    store: Arc<ChunkStore>,
}

pub fn create_router(store: Arc<ChunkStore>, static_dir: &Path, max_body_bytes: usize) -> Router {
    let state = AppState { store };

    let api = Router::new()
        .route("/health", routing::get(api::get_health))
        .route(UPLOAD_PATH, routing::post(api::post_upload))
        .route(UPLOAD_CHUNK_PATH, routing::post(api::post_upload_chunk))
        .with_state(state);
    with_layers(api, static_dir, max_body_bytes)
}

fn with_layers(router: Router, static_dir: &Path, max_body_bytes: usize) -> Router {
    router
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .nest_service("/static", ServeDir::new(static_dir))
        // a panicking handler answers 500 instead of dropping the connection
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(server_header_middleware))
}

async fn server_header_middleware<B>(req: Request<B>, next: Next<B>) -> Response {
    let mut resp = next.run(req).await;
    resp.headers_mut().insert(
        header::SERVER,
        HeaderValue::from_static(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        )),
    );
    resp
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Mutex};

    use chunkup_core::{
        types::UploadResp, ChunkUploader, HttpTransport, MemorySource, UploadError, UploadEvent,
        UploadObserver, CHUNK_SIZE,
    };
    use reqwest::multipart::{Form, Part};
    use tempfile::TempDir;
    use url::Url;

    use super::*;

    const BODY_LIMIT: usize = 6 * 1024 * 1024;

    fn serve(router: Router) -> SocketAddr {
        let server =
            axum::Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(router.into_make_service());
        let addr = server.local_addr();
        tokio::spawn(server);
        addr
    }

    struct TestServer {
        addr: SocketAddr,
        root: TempDir,
    }

    impl TestServer {
        async fn spawn() -> Self {
            let root = tempfile::tempdir().unwrap();
            let store = Arc::new(ChunkStore::new(
                root.path().join("chunks"),
                root.path().join("uploads"),
            ));
            store.prepare().await.unwrap();
            std::fs::create_dir_all(root.path().join("static")).unwrap();
            std::fs::write(root.path().join("static").join("index.html"), "<h1>hi</h1>").unwrap();

            let router = create_router(store, &root.path().join("static"), BODY_LIMIT);
            let addr = serve(router);
            Self { addr, root }
        }

        fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }

        fn base(&self) -> Url {
            Url::parse(&self.url("/")).unwrap()
        }

        fn uploaded(&self, name: &str) -> std::path::PathBuf {
            self.root.path().join("uploads").join(name)
        }
    }

    #[derive(Default)]
    struct PercentRecorder {
        percents: Mutex<Vec<f64>>,
    }

    impl UploadObserver for PercentRecorder {
        fn on_event(&self, event: UploadEvent) {
            if let UploadEvent::Progress { index: 0, percent } = event {
                self.percents.lock().unwrap().push(percent);
            }
        }
    }

    #[derive(Default)]
    struct LogRecorder {
        lines: Mutex<Vec<String>>,
    }

    impl UploadObserver for LogRecorder {
        fn on_event(&self, event: UploadEvent) {
            if let Some(line) = event.log_line() {
                self.lines.lock().unwrap().push(line);
            }
        }
    }

    fn chunk_form(index: &str, total: &str, filename: &str, data: Vec<u8>) -> Form {
        Form::new()
            .part("file", Part::bytes(data).file_name("blob"))
            .text("chunkIndex", index.to_string())
            .text("totalChunks", total.to_string())
            .text("filenameWithExtension", filename.to_string())
    }

    #[tokio::test]
    async fn chunked_upload_is_reassembled() {
        let server = TestServer::spawn().await;
        let data = (0..12_000_000u32)
            .map(|i| (i % 253) as u8)
            .collect::<Vec<_>>();
        let source = MemorySource::new("archive.tar", data.clone());

        let transport = HttpTransport::new(reqwest::Client::new(), &server.base()).unwrap();
        let recorder = Arc::new(LogRecorder::default());
        let uploader = ChunkUploader::new(transport).with_observer(recorder.clone());

        let summary = uploader.upload(Some(&source)).await.unwrap();
        assert_eq!(summary.total_chunks, 3);
        assert_eq!(
            *recorder.lines.lock().unwrap(),
            vec![
                "Chunk 0 uploaded",
                "Chunk 1 uploaded",
                "Chunk 2 uploaded",
                "Upload complete",
            ]
        );
        assert_eq!(std::fs::read(server.uploaded("archive.tar")).unwrap(), data);
    }

    #[tokio::test]
    async fn chunk_response_reports_file_and_status() {
        let server = TestServer::spawn().await;
        let resp = reqwest::Client::new()
            .post(server.url("/upload_chunk"))
            .multipart(chunk_form("0", "2", "notes.txt", b"half".to_vec()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()[header::SERVER.as_str()],
            concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
        );
        let body: UploadResp = resp.json().await.unwrap();
        assert_eq!(body.status, "200");
        assert_eq!(body.file, "notes.txt");
        assert_eq!(body.timestamp.len(), "2006-01-02 15:04:05".len());
        assert!(!server.uploaded("notes.txt").exists());
    }

    #[tokio::test]
    async fn out_of_range_index_is_rejected() {
        let server = TestServer::spawn().await;
        let resp = reqwest::Client::new()
            .post(server.url("/upload_chunk"))
            .multipart(chunk_form("2", "2", "a.bin", b"x".to_vec()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn malformed_fields_are_rejected() {
        let server = TestServer::spawn().await;
        let client = reqwest::Client::new();

        for form in [
            chunk_form("zero", "2", "a.bin", b"x".to_vec()),
            chunk_form("0", "0", "a.bin", b"x".to_vec()),
            chunk_form("0", "1", "..", b"x".to_vec()),
            Form::new()
                .text("chunkIndex", "0")
                .text("totalChunks", "1")
                .text("filenameWithExtension", "a.bin"),
        ] {
            let resp = client
                .post(server.url("/upload_chunk"))
                .multipart(form)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 400);
        }
    }

    #[tokio::test]
    async fn server_error_aborts_client_upload() {
        let server = TestServer::spawn().await;
        // a directory in place of the target file makes reassembly fail
        std::fs::create_dir_all(server.uploaded("blocked.bin")).unwrap();

        let source = MemorySource::new("blocked.bin", vec![7u8; 10]);
        let transport = HttpTransport::new(reqwest::Client::new(), &server.base()).unwrap();
        let recorder = Arc::new(LogRecorder::default());
        let uploader = ChunkUploader::new(transport).with_observer(recorder.clone());

        let error = uploader.upload(Some(&source)).await.unwrap_err();
        assert!(matches!(
            error,
            UploadError::ChunkUploadFailed { index: 0, .. }
        ));
        assert_eq!(
            *recorder.lines.lock().unwrap(),
            vec!["Upload error: 500 Internal Server Error"]
        );
    }

    #[tokio::test]
    async fn single_shot_upload_stores_file() {
        let server = TestServer::spawn().await;
        let form = Form::new().part(
            "file",
            Part::bytes(&b"small file"[..]).file_name("small.txt"),
        );
        let resp = reqwest::Client::new()
            .post(server.url("/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            std::fs::read(server.uploaded("small.txt")).unwrap(),
            b"small file"
        );
    }

    #[tokio::test]
    async fn health_and_static_files_are_served() {
        let server = TestServer::spawn().await;
        let client = reqwest::Client::new();

        let health = client.get(server.url("/health")).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "OK");

        let page = client
            .get(server.url("/static/index.html"))
            .send()
            .await
            .unwrap();
        assert_eq!(page.status(), 200);
        assert_eq!(page.text().await.unwrap(), "<h1>hi</h1>");
    }

    #[tokio::test]
    async fn chunk_progress_is_reported_while_sending() {
        let server = TestServer::spawn().await;
        let source = MemorySource::new("single.bin", vec![3u8; 3_000_000]);
        let transport = HttpTransport::new(reqwest::Client::new(), &server.base()).unwrap();
        let recorder = Arc::new(PercentRecorder::default());
        let uploader = ChunkUploader::new(transport).with_observer(recorder.clone());

        let summary = uploader.upload(Some(&source)).await.unwrap();
        assert_eq!(summary.total_chunks, 1);

        let percents = recorder.percents.lock().unwrap().clone();
        // 0% up front, one report per 64 KiB slice, then the final 100%
        assert!(percents.len() > 10, "only {} progress events", percents.len());
        assert_eq!(percents.first(), Some(&0.0));
        assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(percents[1..percents.len() - 1]
            .iter()
            .any(|percent| *percent > 0.0 && *percent < 100.0));
        assert_eq!(percents[percents.len() - 2], 100.0);
        assert_eq!(percents.last(), Some(&100.0));
    }

    #[tokio::test]
    async fn body_over_limit_is_rejected_but_full_chunk_fits() {
        let server = TestServer::spawn().await;
        let client = reqwest::Client::new();

        let full = chunk_form("0", "2", "big.bin", vec![1u8; CHUNK_SIZE as usize]);
        let resp = client
            .post(server.url("/upload_chunk"))
            .multipart(full)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        // small overshoot so the whole request sits in socket buffers when rejected
        let oversized = chunk_form("1", "2", "big.bin", vec![2u8; BODY_LIMIT + 128 * 1024]);
        let resp = client
            .post(server.url("/upload_chunk"))
            .multipart(oversized)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 413);
        assert!(!server.uploaded("big.bin").exists());
    }

    #[tokio::test]
    async fn panicking_handler_answers_500() {
        async fn boom() -> &'static str {
            panic!("boom")
        }

        let root = tempfile::tempdir().unwrap();
        let router = with_layers(
            Router::new().route("/boom", routing::get(boom)),
            root.path(),
            BODY_LIMIT,
        );
        let addr = serve(router);

        let resp = reqwest::get(format!("http://{addr}/boom")).await.unwrap();
        assert_eq!(resp.status(), 500);
        assert_eq!(
            resp.headers()[header::SERVER.as_str()],
            concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
        );

        // the server keeps serving after the panic
        let resp = reqwest::get(format!("http://{addr}/boom")).await.unwrap();
        assert_eq!(resp.status(), 500);
    }
}
