//! `POST /upload/{type}`: the admin upload endpoint.
//!
//! The request is authenticated, the category named by `type` is prepared and
//! checked in, then the files are transferred in one of two modes:
//!
//! - single-client mode (`client` given): one file from the client's own
//!   multipart field, answered in the client's protocol;
//! - batch mode: every `files[]` part in order, answered through the
//!   responder registered for `field`.

use crate::{
    auth::CurrentUser,
    errors::UploadError,
    models::upload::IncomingFile,
    registry::{client::UploadClient, responder::render},
    services::{
        prepare::PreparedUpload,
        qr::decode_qr,
        storer::Storer,
        upload_service::{UploadCompletion, UploadPipeline},
    },
    state::AppState,
};
use axum::{
    extract::{Multipart, Path, Query, State},
    response::Response,
};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, warn};

/// Multipart field names carrying batch files.
const BATCH_FIELDS: &[&str] = &["files[]", "files"];

/// Pipe that decodes a QR code from the first stored file.
const PIPE_DEQR: &str = "deqr";

/// Request parameters and file parts of one upload request.
#[derive(Debug, Default)]
pub struct UploadForm {
    params: HashMap<String, String>,
    files: Vec<IncomingFile>,
}

impl UploadForm {
    /// Read every part of `multipart`. Text parts override query parameters
    /// of the same name.
    pub async fn read(
        query: HashMap<String, String>,
        mut multipart: Multipart,
    ) -> Result<Self, UploadError> {
        let mut form = Self {
            params: query,
            files: Vec::new(),
        };
        let multipart_err = |e: axum::extract::multipart::MultipartError| {
            UploadError::Multipart(e.body_text())
        };

        while let Some(field) = multipart.next_field().await.map_err(multipart_err)? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field.content_type().map(str::to_string);
                    let data = field.bytes().await.map_err(multipart_err)?;
                    // an untouched file input posts an empty, unnamed part
                    if file_name.is_empty() && data.is_empty() {
                        continue;
                    }
                    form.files.push(IncomingFile {
                        field: name,
                        file_name,
                        content_type,
                        data,
                    });
                }
                None => {
                    let value = field.text().await.map_err(multipart_err)?;
                    form.params.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    /// Parameter value, empty when absent.
    pub fn param(&self, name: &str) -> &str {
        self.params.get(name).map(String::as_str).unwrap_or_default()
    }

    fn file_in(&self, field: &str) -> Option<&IncomingFile> {
        self.files.iter().find(|f| f.field == field)
    }

    fn batch_files(&self) -> Vec<IncomingFile> {
        self.files
            .iter()
            .filter(|f| BATCH_FIELDS.contains(&f.field.as_str()))
            .cloned()
            .collect()
    }
}

/// Answer `err` through the responder registered for `field`.
fn fail(state: &AppState, field: &str, err: UploadError) -> Response {
    debug!(field, error = %err, "upload refused");
    let (body, embed) = state.responders.respond(field, Some(&err), &[]);
    render(body, embed, Some(err))
}

/// `POST /upload` without a category.
pub async fn upload_missing_type(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let field = query.get("field").map(String::as_str).unwrap_or_default();
    fail(&state, field, UploadError::MissingParam("type"))
}

/// `POST /upload/{type}`
pub async fn upload(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(upload_type): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    multipart: Multipart,
) -> Response {
    let query_field = query.get("field").cloned().unwrap_or_default();
    let form = match UploadForm::read(query, multipart).await {
        Ok(form) => form,
        Err(err) => return fail(&state, &query_field, err),
    };
    let field = form.param("field").to_string();

    if upload_type.trim().is_empty() {
        return fail(&state, &field, UploadError::MissingParam("type"));
    }
    let prepared = match state
        .preparer
        .prepare(&upload_type, form.param("filetype"))
    {
        Ok(prepared) => prepared,
        Err(err) => return fail(&state, &field, err),
    };

    let refid = Some(form.param("refid")).filter(|id| !id.is_empty());
    let template = prepared.new_file(user.id, refid);
    let checkin = match prepared.checkin(&template) {
        Ok(checkin) => checkin,
        Err(err) => return fail(&state, &field, err),
    };
    info!(
        user = %user.username,
        subdir = %prepared.subdir.key,
        save_dir = %checkin.subdir,
        "upload started"
    );

    let storer = prepared.storer();
    let pipeline = UploadPipeline {
        validator: &prepared,
        checkin: &checkin,
        template: &template,
        completion: UploadCompletion {
            repo: &state.repo,
            storer: &storer,
            thumbnailer: &state.thumbnailer,
            thumb_sizes: prepared.thumb_sizes(),
            watermark: state.watermark.as_ref(),
        },
    };

    let client = form.param("client");
    if !client.is_empty() {
        return match state.clients.get(client) {
            Some(client) => upload_with_client(&pipeline, client.as_ref(), &form).await,
            None => fail(&state, &field, UploadError::UnknownClient(client.to_string())),
        };
    }
    upload_batch(&state, &pipeline, &prepared, &field, &form).await
}

async fn upload_with_client(
    pipeline: &UploadPipeline<'_>,
    client: &dyn UploadClient,
    form: &UploadForm,
) -> Response {
    let Some(file) = form.file_in(client.field_name()) else {
        return client.respond(None, Some(&UploadError::NoFiles));
    };

    match pipeline.upload_one(file).await {
        Ok(result) => client.respond(Some(&result), None),
        Err(UploadError::ExistsFile(path)) => {
            // same row and field uploaded before: hand back the stored file
            info!(client = client.name(), path = %path, "file already stored");
            client.respond(Some(&pipeline.existing(file, path)), None)
        }
        Err(err) => {
            warn!(client = client.name(), file = %file.file_name, error = %err, "upload failed");
            client.respond(None, Some(&err))
        }
    }
}

async fn upload_batch(
    state: &AppState,
    pipeline: &UploadPipeline<'_>,
    prepared: &PreparedUpload,
    field: &str,
    form: &UploadForm,
) -> Response {
    let files = form.batch_files();
    let (results, err) = pipeline.upload_batch(&files).await;
    if let Some(err) = &err {
        warn!(
            subdir = %prepared.subdir.key,
            stored = results.len(),
            error = %err,
            "batch upload stopped"
        );
    }

    let urls: Vec<String> = results.iter().map(|r| r.file_url.clone()).collect();
    let (mut body, embed) = state.responders.respond(field, err.as_ref(), &urls);

    match form.param("pipe") {
        "" => {}
        PIPE_DEQR => {
            if let Some(first) = results.first() {
                let raw = deqr(pipeline.completion.storer, &first.save_path).await;
                body.insert("raw".into(), Value::String(raw));
            }
        }
        other => debug!(pipe = other, "ignoring unknown pipe"),
    }

    render(body, embed, err)
}

/// QR payload of the stored file at `path`, or the reason there is none.
async fn deqr(storer: &Arc<dyn Storer>, path: &str) -> String {
    let data = match storer.get(path).await {
        Ok(data) => data,
        Err(err) => return err.to_string(),
    };
    match tokio::task::spawn_blocking(move || decode_qr(&data)).await {
        Ok(Ok(text)) => text,
        Ok(Err(err)) => err.to_string(),
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::AppConfig,
        routes::routes::routes,
        services::{file_repository::tests::repository, qr::tests::qr_png, thumbnail::tests::png},
        state::AppState,
    };
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header},
        response::Response,
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const BOUNDARY: &str = "upload-test-boundary";
    const TOKEN: &str = "secret-token";

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, Vec<u8>),
    }

    fn multipart_body(parts: Vec<Part<'_>>) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File(name, file_name, data) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(&data);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn post(uri: &str, token: Option<&str>, parts: Vec<Part<'_>>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(multipart_body(parts))).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    struct TestApp {
        dir: tempfile::TempDir,
        state: AppState,
        router: Router,
    }

    impl TestApp {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let repo = repository(&dir).await;
            repo.create_user("admin", TOKEN).await.unwrap();
            let cfg = AppConfig::for_tests(&dir.path().join("files"));
            let state = AppState::new(&cfg, repo.db.clone(), None);
            let router = routes(&state, cfg.files_route().as_deref()).with_state(state.clone());
            Self { dir, state, router }
        }

        async fn send(&self, request: Request<Body>) -> Response {
            self.router.clone().oneshot(request).await.unwrap()
        }

        fn stored_entries(&self) -> usize {
            std::fs::read_dir(self.dir.path().join("files"))
                .map(|entries| entries.count())
                .unwrap_or(0)
        }
    }

    #[tokio::test]
    async fn unauthenticated_upload_redirects_without_writes() {
        let app = TestApp::new().await;

        for token in [None, Some("wrong")] {
            let response = app
                .send(post(
                    "/upload/user",
                    token,
                    vec![Part::File("files[]", "a.png", png(40, 30))],
                ))
                .await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(response.headers()[header::LOCATION], "/login");
        }
        assert_eq!(app.state.repo.count_files().await.unwrap(), 0);
        assert_eq!(app.stored_entries(), 0);
    }

    #[tokio::test]
    async fn missing_type_goes_through_responder() {
        let app = TestApp::new().await;

        let response = app.send(post("/upload", Some(TOKEN), Vec::new())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], json!("missing parameter `type`"));

        let response = app
            .send(post("/upload?field=ajax", Some(TOKEN), Vec::new()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(app.state.repo.count_files().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn batch_upload_stores_files_and_thumbnails() {
        let app = TestApp::new().await;

        let response = app
            .send(post(
                "/upload/user",
                Some(TOKEN),
                vec![
                    Part::File("files[]", "a.png", png(40, 30)),
                    Part::File("files[]", "notes.txt", b"hello".to_vec()),
                ],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["Code"], json!(1));
        assert_eq!(body["State"], json!("Success"));
        let files = body["Data"]["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].as_str().unwrap().starts_with("/files/user/0/"));

        assert_eq!(app.state.repo.count_files().await.unwrap(), 2);
        // two configured sizes, only for the image
        assert_eq!(app.state.repo.count_thumbs().await.unwrap(), 2);

        let url = files[0].as_str().unwrap();
        let response = app
            .send(Request::get(url).body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    }

    #[tokio::test]
    async fn missing_or_escaping_file_paths_are_rejected() {
        let app = TestApp::new().await;
        let response = app
            .send(Request::get("/files/user/0/none.png").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = app
            .send(Request::get("/files/user/../x.png").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn plain_field_reports_partial_batch_inline() {
        let app = TestApp::new().await;

        let response = app
            .send(post(
                "/upload/user",
                Some(TOKEN),
                vec![
                    Part::Text("field", "ajax"),
                    Part::File("files[]", "a.txt", b"a".to_vec()),
                    Part::File("files[]", "b.exe", b"MZ".to_vec()),
                ],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["files"].as_array().unwrap().len(), 1);
        assert!(body["error"].as_str().unwrap().contains("b.exe"));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let app = TestApp::new().await;
        let response = app
            .send(post("/upload/user", Some(TOKEN), vec![Part::Text("x", "y")]))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], json!("no files uploaded"));
    }

    #[tokio::test]
    async fn unknown_category_is_not_allowed() {
        let app = TestApp::new().await;
        let response = app
            .send(post(
                "/upload/secrets",
                Some(TOKEN),
                vec![Part::File("files[]", "a.txt", b"a".to_vec())],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(app.stored_entries(), 0);
    }

    #[tokio::test]
    async fn client_reupload_returns_existing_file() {
        let app = TestApp::new().await;
        let upload = || {
            post(
                "/upload/user.avatar?client=webuploader&refid=1",
                Some(TOKEN),
                vec![Part::File("file", "me.png", png(40, 30))],
            )
        };

        let first = json_body(app.send(upload()).await).await;
        assert_eq!(first["Code"], json!(1));
        assert_eq!(first["Data"]["url"], json!("/files/user/1/avatar.png"));

        let second = json_body(app.send(upload()).await).await;
        assert_eq!(second["Code"], json!(1));
        assert_eq!(second["Data"]["url"], json!("/files/user/1/avatar.png"));
        assert_eq!(app.state.repo.count_files().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn batch_reupload_of_fixed_name_keeps_stored_file() {
        let app = TestApp::new().await;
        let upload = || {
            post(
                "/upload/user.avatar?refid=1",
                Some(TOKEN),
                vec![Part::File("files[]", "me.png", png(40, 30))],
            )
        };

        for _ in 0..2 {
            let response = app.send(upload()).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["Data"]["files"], json!(["/files/user/1/avatar.png"]));
        }
        assert_eq!(app.state.repo.count_files().await.unwrap(), 1);
        assert_eq!(app.state.repo.count_thumbs().await.unwrap(), 2);

        for url in [
            "/files/user/1/avatar.png",
            "/files/user/1/avatar_16_16.png",
            "/files/user/1/avatar_32_24.png",
        ] {
            let response = app.send(Request::get(url).body(Body::empty()).unwrap()).await;
            assert_eq!(response.status(), StatusCode::OK, "{url}");
        }
    }

    #[tokio::test]
    async fn unknown_client_is_an_error() {
        let app = TestApp::new().await;
        let response = app
            .send(post(
                "/upload/user?client=tinymce",
                Some(TOKEN),
                vec![Part::File("file", "a.png", png(8, 8))],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(app.state.repo.count_files().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deqr_pipe_reports_payload_or_reason() {
        let app = TestApp::new().await;

        let response = app
            .send(post(
                "/upload/user?pipe=deqr",
                Some(TOKEN),
                vec![Part::File("files[]", "code.png", qr_png("WIFI:S:office;;"))],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["Data"]["raw"], json!("WIFI:S:office;;"));

        let response = app
            .send(post(
                "/upload/user?pipe=deqr",
                Some(TOKEN),
                vec![Part::File("files[]", "plain.png", png(64, 64))],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["Data"]["raw"], json!("no QR code found"));
    }
}
