use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ipaas_deployer::client::{HttpResponse, Method, TenantTransport};
use ipaas_deployer::error::Result;
use ipaas_deployer::partner::{PartnerDirectory, SyncOptions};
use ipaas_deployer::properties;
use serde_json::json;

/// Route-keyed fake transport recording every call.
struct FakeTransport {
    routes: HashMap<(&'static str, String), (u16, String)>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeTransport {
    fn new() -> Self {
        Self {
            routes: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn route(mut self, method: &'static str, path: &str, status: u16, body: serde_json::Value) -> Self {
        self.routes
            .insert((method, path.to_string()), (status, body.to_string()));
        self
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TenantTransport for FakeTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        _headers: &[(String, String)],
        _body: Option<Vec<u8>>,
    ) -> Result<HttpResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((method.as_str().to_string(), path.to_string()));
        let (status, body) = self
            .routes
            .get(&(method.as_str(), path.to_string()))
            .cloned()
            .unwrap_or((404, "{}".to_string()));
        Ok(HttpResponse {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.into_bytes(),
        })
    }
}

fn options(resources_dir: std::path::PathBuf) -> SyncOptions {
    SyncOptions {
        resources_dir,
        pid_filter: None,
        replace: true,
        full_sync: false,
        dry_run: false,
    }
}

#[tokio::test]
async fn snapshot_round_trips_string_parameters() {
    let root = tempfile::tempdir().expect("tempdir");
    let transport = FakeTransport::new()
        .route(
            "GET",
            "api/v1/StringParameters?$select=Pid,Id,Value",
            200,
            json!({"d": {"results": [
                {"Pid": "P1", "Id": "k2", "Value": "plain"},
                {"Pid": "P1", "Id": "k1", "Value": "line1\nline2"},
            ]}}),
        )
        .route("GET", "api/v1/BinaryParameters", 200, json!({"d": {"results": []}}));

    let engine = PartnerDirectory::new(&transport);
    let report = engine
        .snapshot(&options(root.path().to_path_buf()))
        .await
        .expect("snapshot");
    assert_eq!(report.created.len(), 2);

    let path = root.path().join("P1/String.properties");
    let on_disk = fs::read_to_string(&path).expect("read");
    assert_eq!(on_disk, "k1=line1\\nline2\nk2=plain\n");

    let read_back: Vec<(String, String)> = properties::read(&path).expect("read back");
    assert_eq!(
        read_back,
        vec![
            ("k1".to_string(), "line1\nline2".to_string()),
            ("k2".to_string(), "plain".to_string()),
        ]
    );
}

#[tokio::test]
async fn snapshot_writes_binaries_with_sidecar() {
    let root = tempfile::tempdir().expect("tempdir");
    let payload = BASE64.encode(b"certificate-bytes");
    let transport = FakeTransport::new()
        .route(
            "GET",
            "api/v1/StringParameters?$select=Pid,Id,Value",
            200,
            json!({"d": {"results": []}}),
        )
        .route(
            "GET",
            "api/v1/BinaryParameters",
            200,
            json!({"d": {"results": [
                {"Pid": "P1", "Id": "cert", "Value": payload, "ContentType": "crt"},
                {"Pid": "P1", "Id": "doc", "Value": payload, "ContentType": "text/plain; charset=utf-8"},
            ]}}),
        );

    let engine = PartnerDirectory::new(&transport);
    let report = engine
        .snapshot(&options(root.path().to_path_buf()))
        .await
        .expect("snapshot");
    assert_eq!(report.created.len(), 2);

    let binary_dir = root.path().join("P1/Binary");
    assert_eq!(
        fs::read(binary_dir.join("cert.crt")).expect("binary"),
        b"certificate-bytes"
    );
    // Only the parameterized content-type lands in the sidecar.
    let sidecar: HashMap<String, String> = serde_json::from_str(
        &fs::read_to_string(binary_dir.join("_metadata.json")).expect("sidecar"),
    )
    .expect("sidecar json");
    assert_eq!(sidecar.len(), 1);
    assert_eq!(
        sidecar.get("doc.plain").map(String::as_str),
        Some("text/plain; charset=utf-8")
    );
}

#[tokio::test]
async fn deploy_creates_updates_and_leaves_unchanged() {
    let root = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(root.path().join("P1")).expect("mkdir");
    fs::write(
        root.path().join("P1/String.properties"),
        "same=v1\nchanged=new\nfresh=v3\n",
    )
    .expect("write");

    let transport = FakeTransport::new()
        .route(
            "GET",
            "api/v1/StringParameters(Pid='P1',Id='same')",
            200,
            json!({"d": {"Pid": "P1", "Id": "same", "Value": "v1"}}),
        )
        .route(
            "GET",
            "api/v1/StringParameters(Pid='P1',Id='changed')",
            200,
            json!({"d": {"Pid": "P1", "Id": "changed", "Value": "old"}}),
        )
        .route(
            "PUT",
            "api/v1/StringParameters(Pid='P1',Id='changed')",
            204,
            json!({}),
        )
        .route("POST", "api/v1/StringParameters", 201, json!({}));

    let engine = PartnerDirectory::new(&transport);
    let report = engine
        .deploy(&options(root.path().to_path_buf()))
        .await
        .expect("deploy");

    assert_eq!(report.unchanged, vec!["P1/same"]);
    assert_eq!(report.updated, vec!["P1/changed"]);
    assert_eq!(report.created, vec!["P1/fresh"]);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn full_sync_deletes_only_managed_partners() {
    let root = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(root.path().join("P1")).expect("mkdir");
    fs::write(root.path().join("P1/String.properties"), "s1=v1\n").expect("write");

    let transport = FakeTransport::new()
        .route(
            "GET",
            "api/v1/StringParameters(Pid='P1',Id='s1')",
            200,
            json!({"d": {"Pid": "P1", "Id": "s1", "Value": "v1"}}),
        )
        .route(
            "GET",
            "api/v1/StringParameters?$select=Pid,Id,Value",
            200,
            json!({"d": {"results": [
                {"Pid": "P1", "Id": "s1", "Value": "v1"},
                {"Pid": "P1", "Id": "s2", "Value": "v2"},
                {"Pid": "P2", "Id": "x1", "Value": "vx"},
            ]}}),
        )
        .route("GET", "api/v1/BinaryParameters", 200, json!({"d": {"results": []}}))
        .route(
            "DELETE",
            "api/v1/StringParameters(Pid='P1',Id='s2')",
            204,
            json!({}),
        );

    let mut opts = options(root.path().to_path_buf());
    opts.full_sync = true;

    let engine = PartnerDirectory::new(&transport);
    let report = engine.deploy(&opts).await.expect("deploy");

    assert_eq!(report.unchanged, vec!["P1/s1"]);
    assert_eq!(report.deleted, vec!["P1/s2"]);
    assert!(report.errors.is_empty());

    let calls = transport.calls();
    let deletes: Vec<&str> = calls
        .iter()
        .filter(|(method, _)| method == "DELETE")
        .map(|(_, path)| path.as_str())
        .collect();
    assert_eq!(deletes, vec!["api/v1/StringParameters(Pid='P1',Id='s2')"]);
}

#[tokio::test]
async fn dry_run_reports_without_mutating() {
    let root = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(root.path().join("P1")).expect("mkdir");
    fs::write(root.path().join("P1/String.properties"), "fresh=v1\n").expect("write");

    let transport = FakeTransport::new();

    let mut opts = options(root.path().to_path_buf());
    opts.dry_run = true;
    opts.full_sync = true;

    let engine = PartnerDirectory::new(&transport);
    let report = engine.deploy(&opts).await.expect("deploy");

    assert_eq!(report.created, vec!["P1/fresh"]);
    let calls = transport.calls();
    assert!(
        calls.iter().all(|(method, _)| method == "GET"),
        "only probes expected, got {calls:?}"
    );
}

#[tokio::test]
async fn batch_full_sync_deletes_after_submission() {
    let root = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(root.path().join("P1")).expect("mkdir");
    fs::write(root.path().join("P1/String.properties"), "s1=v1\n").expect("write");

    let transport = FakeTransport::new()
        .route(
            "GET",
            "api/v1/StringParameters(Pid='P1',Id='s1')",
            200,
            json!({"d": {"Pid": "P1", "Id": "s1", "Value": "v1"}}),
        )
        .route(
            "GET",
            "api/v1/StringParameters?$select=Pid,Id,Value",
            200,
            json!({"d": {"results": [
                {"Pid": "P1", "Id": "s1", "Value": "v1"},
                {"Pid": "P1", "Id": "s2", "Value": "v2"},
                {"Pid": "P2", "Id": "x1", "Value": "vx"},
            ]}}),
        )
        .route("GET", "api/v1/BinaryParameters", 200, json!({"d": {"results": []}}))
        .route(
            "DELETE",
            "api/v1/StringParameters(Pid='P1',Id='s2')",
            204,
            json!({}),
        );

    let mut opts = options(root.path().to_path_buf());
    opts.full_sync = true;

    let engine = PartnerDirectory::new(&transport);
    let report = engine.batch_deploy(&opts).await.expect("batch deploy");

    assert_eq!(report.unchanged, vec!["P1/s1"]);
    assert_eq!(report.deleted, vec!["P1/s2"]);
    assert!(report.errors.is_empty());

    let calls = transport.calls();
    let deletes: Vec<&str> = calls
        .iter()
        .filter(|(method, _)| method == "DELETE")
        .map(|(_, path)| path.as_str())
        .collect();
    assert_eq!(deletes, vec!["api/v1/StringParameters(Pid='P1',Id='s2')"]);
}

#[tokio::test]
async fn batch_dry_run_records_intended_outcomes() {
    let root = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(root.path().join("P1")).expect("mkdir");
    fs::write(
        root.path().join("P1/String.properties"),
        "changed=new\nfresh=v1\n",
    )
    .expect("write");

    let transport = FakeTransport::new().route(
        "GET",
        "api/v1/StringParameters(Pid='P1',Id='changed')",
        200,
        json!({"d": {"Pid": "P1", "Id": "changed", "Value": "old"}}),
    );

    let mut opts = options(root.path().to_path_buf());
    opts.dry_run = true;

    let engine = PartnerDirectory::new(&transport);
    let report = engine.batch_deploy(&opts).await.expect("batch deploy");

    assert_eq!(report.updated, vec!["P1/changed"]);
    assert_eq!(report.created, vec!["P1/fresh"]);
    let calls = transport.calls();
    assert!(
        calls.iter().all(|(method, _)| method == "GET"),
        "only probes expected, got {calls:?}"
    );
}

#[tokio::test]
async fn duplicate_binary_stems_use_first_file_only() {
    let root = tempfile::tempdir().expect("tempdir");
    let binary_dir = root.path().join("P1/Binary");
    fs::create_dir_all(&binary_dir).expect("mkdir");
    fs::write(binary_dir.join("cert.crt"), b"one").expect("write crt");
    fs::write(binary_dir.join("cert.pem"), b"two").expect("write pem");

    let transport = FakeTransport::new();
    let mut opts = options(root.path().to_path_buf());
    opts.dry_run = true;

    let engine = PartnerDirectory::new(&transport);
    let report = engine.deploy(&opts).await.expect("deploy");

    // Whichever file the directory listing yields first wins; the other is
    // warned and skipped.
    assert_eq!(report.created, vec!["P1/cert"]);
}

#[tokio::test]
async fn add_only_skips_differing_values() {
    let root = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(root.path().join("P1")).expect("mkdir");
    fs::write(root.path().join("P1/String.properties"), "changed=new\n").expect("write");

    let transport = FakeTransport::new().route(
        "GET",
        "api/v1/StringParameters(Pid='P1',Id='changed')",
        200,
        json!({"d": {"Pid": "P1", "Id": "changed", "Value": "old"}}),
    );

    let mut opts = options(root.path().to_path_buf());
    opts.replace = false;

    let engine = PartnerDirectory::new(&transport);
    let report = engine.deploy(&opts).await.expect("deploy");

    assert_eq!(report.skipped, vec!["P1/changed"]);
    assert!(report.updated.is_empty());
    let calls = transport.calls();
    assert!(calls.iter().all(|(method, _)| method == "GET"));
}
