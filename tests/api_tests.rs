mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::assertions::assert_error_response;
use common::harness::{blob_store, put_object, TestHarness, IMAGE_BYTES};
use serde_json::{json, Value};
use tower::ServiceExt;

use udlf_gateway::server::routes::build_router;
use udlf_gateway::storage::DatasetStore;

/// Harness with the fixture dataset, an uploaded `run.ini` and a running
/// server over the local filesystem.
async fn start_local() -> (String, TestHarness) {
    let harness = TestHarness::new();
    let dataset = harness.write_dataset();
    harness.write_run_config("run.ini", &dataset);
    let base_url = harness.start_server(DatasetStore::local()).await;
    (base_url, harness)
}

async fn get_json(url: &str) -> Value {
    let resp = reqwest::get(url).await.expect("request should succeed");
    assert_eq!(resp.status(), 200, "GET {url}");
    resp.json().await.expect("body should be JSON")
}

#[tokio::test]
async fn test_health_check() {
    let (base_url, _harness) = start_local().await;
    for path in ["/", "/healthz"] {
        let body = get_json(&format!("{base_url}{path}")).await;
        assert_eq!(body["status"], "OK");
        assert!(body["timestamp"].is_string());
    }
}

#[tokio::test]
async fn test_router_serves_without_listener() {
    let harness = TestHarness::new();
    let app = build_router(harness.state(DatasetStore::local()));

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("router should respond");
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_paginated_file_list() {
    let (base_url, _harness) = start_local().await;

    let body = get_json(&format!(
        "{base_url}/paginated-file-list-by-config/run.ini/page/2?pageSize=2"
    ))
    .await;
    assert_eq!(body["totalItems"], 5);
    assert_eq!(body["totalPages"], 3);
    assert_eq!(body["currentPage"], 2);
    assert_eq!(
        body["items"],
        json!([
            {"lineNumber": 3, "fileInputNameLine": "bat-1.gif"},
            {"lineNumber": 4, "fileInputNameLine": "bat-2.gif"},
        ])
    );

    let body = get_json(&format!(
        "{base_url}/paginated-file-list-by-config/run.ini/page/1"
    ))
    .await;
    assert_eq!(body["pageSize"], 10);
    assert_eq!(body["items"].as_array().map(Vec::len), Some(5));
}

#[tokio::test]
async fn test_paginated_file_list_rejects_bad_input() {
    let (base_url, _harness) = start_local().await;
    for path in [
        "/paginated-file-list-by-config/run.ini/page/0",
        "/paginated-file-list-by-config/run.ini/page/abc",
        "/paginated-file-list-by-config/run.ini/page/1?pageSize=0",
        "/paginated-file-list-by-config/run.ini/page/1?pageSize=99999",
    ] {
        let resp = reqwest::get(format!("{base_url}{path}")).await.expect("request");
        assert_error_response(resp, 400).await;
    }

    let resp = reqwest::get(format!(
        "{base_url}/paginated-file-list-by-config/other.ini/page/1"
    ))
    .await
    .expect("request");
    assert_error_response(resp, 404).await;
}

#[tokio::test]
async fn test_file_input_name_by_index_is_zero_based() {
    let (base_url, _harness) = start_local().await;

    let body = get_json(&format!(
        "{base_url}/file-input-name-by-index?indexList=0,4&configFile=run.ini"
    ))
    .await;
    assert_eq!(
        body,
        json!([
            {"lineNumber": 1, "fileInputNameLine": "apple-1.gif"},
            {"lineNumber": 5, "fileInputNameLine": "cup-1.gif"},
        ])
    );

    let resp = reqwest::get(format!(
        "{base_url}/file-input-name-by-index?indexList=5&configFile=run.ini"
    ))
    .await
    .expect("request");
    assert_error_response(resp, 400).await;

    let resp = reqwest::get(format!("{base_url}/file-input-name-by-index"))
        .await
        .expect("request");
    assert_error_response(resp, 400).await;
}

#[tokio::test]
async fn test_details_by_line_numbers() {
    let (base_url, _harness) = start_local().await;
    let body = get_json(&format!(
        "{base_url}/file-input-details-by-line-numbers?lineNumbers=2,99&configFile=run.ini"
    ))
    .await;
    assert_eq!(
        body,
        json!({"apple-2.gif": {"class": "apple", "lineIndexInInputFile": 2}})
    );
}

#[tokio::test]
async fn test_line_by_image_name() {
    let (base_url, _harness) = start_local().await;
    let body = get_json(&format!(
        "{base_url}/line-by-image-name/bat-2.gif?configFile=run.ini"
    ))
    .await;
    assert_eq!(body, json!({"imageName": "bat-2.gif", "lineNumber": 4}));

    let resp = reqwest::get(format!(
        "{base_url}/line-by-image-name/ghost.gif?configFile=run.ini"
    ))
    .await
    .expect("request");
    assert_error_response(resp, 404).await;
}

#[tokio::test]
async fn test_names_from_default_dataset() {
    let (base_url, _harness) = start_local().await;
    let body = get_json(&format!("{base_url}/get-all-input-file-names")).await;
    assert_eq!(
        body,
        json!(["apple-1.gif", "apple-2.gif", "bat-1.gif", "bat-2.gif", "cup-1.gif"])
    );
}

#[tokio::test]
async fn test_grouped_class_names() {
    let (base_url, _harness) = start_local().await;
    let by_path = get_json(&format!("{base_url}/grouped-input-class-names/run.ini")).await;
    let by_query = get_json(&format!(
        "{base_url}/grouped-input-class-names?configFile=run.ini"
    ))
    .await;
    assert_eq!(by_path, by_query);
    assert_eq!(by_path["cup"], json!(["cup-1.gif", "ghost.gif"]));
}

#[tokio::test]
async fn test_input_file_details_by_name() {
    let (base_url, _harness) = start_local().await;
    let some = get_json(&format!(
        "{base_url}/input-file-details-by-name?configFile=run.ini&names=cup-1.gif,ghost.gif"
    ))
    .await;
    assert_eq!(
        some,
        json!({"cup-1.gif": {"class": "cup", "lineIndexInInputFile": 5}})
    );

    let all = get_json(&format!(
        "{base_url}/input-file-details-by-name?configFile=run.ini"
    ))
    .await;
    assert_eq!(all.as_object().map(|m| m.len()), Some(5));
}

#[tokio::test]
async fn test_image_file() {
    let (base_url, _harness) = start_local().await;
    let resp = reqwest::get(format!(
        "{base_url}/image-file/apple-1.gif?configFile=run.ini"
    ))
    .await
    .expect("request");
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"].to_str().expect("header"),
        "image/gif"
    );
    assert_eq!(resp.bytes().await.expect("body").as_ref(), IMAGE_BYTES);

    let resp = reqwest::get(format!("{base_url}/image-file/apple-1.gif"))
        .await
        .expect("request");
    assert_error_response(resp, 400).await;

    let resp = reqwest::get(format!(
        "{base_url}/image-file/missing.gif?configFile=run.ini"
    ))
    .await
    .expect("request");
    assert_error_response(resp, 404).await;
}

#[tokio::test]
async fn test_dynamic_paths() {
    let (base_url, harness) = start_local().await;
    let body = get_json(&format!("{base_url}/dynamic-paths/run.ini")).await;
    assert_eq!(body["success"], true);
    assert_eq!(
        body["data"]["datasetList"],
        harness
            .root()
            .join("Datasets/mpeg7/lists_mpeg7.txt")
            .display()
            .to_string()
    );
    assert!(body["data"]["datasetImages"].is_string());

    // Directory parts of the name are dropped.
    let body = get_json(&format!("{base_url}/dynamic-paths/..%2Frun.ini")).await;
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_clear_cache() {
    let (base_url, harness) = start_local().await;
    get_json(&format!("{base_url}/get-all-input-file-names?configFile=run.ini")).await;

    // The cached index is served until the cache is cleared.
    harness.write("Datasets/mpeg7/lists_mpeg7.txt", "only.gif\n");
    let names = get_json(&format!("{base_url}/get-all-input-file-names?configFile=run.ini")).await;
    assert_eq!(names.as_array().map(Vec::len), Some(5));

    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("{base_url}/clear-cache"))
        .json(&json!({"configFileName": "run.ini"}))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["removed"], 2);

    let names = get_json(&format!("{base_url}/get-all-input-file-names?configFile=run.ini")).await;
    assert_eq!(names, json!(["only.gif"]));

    let resp = client
        .post(format!("{base_url}/clear-cache"))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["message"], "All caches cleared");
}

#[tokio::test]
async fn test_output_line_and_file() {
    let (base_url, harness) = start_local().await;
    harness.write("outputs/ranked.txt", "0 1 2\n3 4 5\n");

    let body = get_json(&format!("{base_url}/outputs/ranked.txt/line/2")).await;
    assert_eq!(body, json!({"line": 2, "lineContent": "3 4 5"}));

    let resp = reqwest::get(format!("{base_url}/outputs/ranked.txt/line/3"))
        .await
        .expect("request");
    assert_error_response(resp, 404).await;
    let resp = reqwest::get(format!("{base_url}/outputs/ranked.txt/line/0"))
        .await
        .expect("request");
    assert_error_response(resp, 400).await;

    let resp = reqwest::get(format!("{base_url}/output-file/ranked.txt"))
        .await
        .expect("request");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("body"), "0 1 2\n3 4 5\n");
}

#[tokio::test]
async fn test_count_file_lines_is_allowlisted() {
    let (base_url, harness) = start_local().await;
    let client = reqwest::Client::new();

    let allowed = harness.root().join("Datasets/mpeg7/lists_mpeg7.txt");
    let body: Value = client
        .get(format!("{base_url}/count-file-lines"))
        .query(&[("filePath", allowed.display().to_string())])
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["lineCount"], 5);

    let resp = client
        .get(format!("{base_url}/count-file-lines"))
        .query(&[("filePath", "/etc/passwd")])
        .send()
        .await
        .expect("request");
    assert_error_response(resp, 403).await;
}

#[tokio::test]
async fn test_directory_endpoints() {
    let (base_url, harness) = start_local().await;
    let client = reqwest::Client::new();

    let body = get_json(&format!("{base_url}/api/directory/list")).await;
    assert_eq!(body["success"], true);
    let names: Vec<_> = body["data"]["items"]
        .as_array()
        .expect("items")
        .iter()
        .map(|i| i["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert!(names.contains(&"Datasets".to_string()));
    assert_eq!(body["data"]["items"][0]["type"], "directory");

    let list_file = harness.root().join("Datasets/mpeg7/lists_mpeg7.txt");
    let body = get_json(&format!(
        "{base_url}/api/directory/info{}",
        list_file.display()
    ))
    .await;
    assert_eq!(body["data"]["name"], "lists_mpeg7.txt");
    assert_eq!(body["data"]["type"], "file");

    let body: Value = client
        .get(format!("{base_url}/api/directory/search"))
        .query(&[("fileName", "*.gif"), ("maxDepth", "5")])
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["data"]["totalFound"], 1);
    assert_eq!(body["data"]["fileName"], "*.gif");

    let body = get_json(&format!("{base_url}/api/directory/available-paths")).await;
    assert_eq!(
        body["data"]["rootPath"],
        harness.root().display().to_string()
    );

    let resp = client
        .get(format!("{base_url}/api/directory/list"))
        .query(&[("path", "/etc")])
        .send()
        .await
        .expect("request");
    assert_error_response(resp, 403).await;
}

#[tokio::test]
async fn test_download_url_requires_blob_signer() {
    let (base_url, _harness) = start_local().await;
    let resp = reqwest::get(format!(
        "{base_url}/api/directory/download-url?path=/app/Datasets/a.txt"
    ))
    .await
    .expect("request");
    assert_error_response(resp, 501).await;

    let resp = reqwest::get(format!("{base_url}/api/directory/download-url"))
        .await
        .expect("request");
    assert_error_response(resp, 400).await;
}

#[tokio::test]
async fn test_download_url_rejects_out_of_range_ttl() {
    let (base_url, _harness) = start_local().await;
    for ttl in ["0", "10081", "307445734561825861", "18446744073709551615"] {
        let resp = reqwest::get(format!(
            "{base_url}/api/directory/download-url?path=x&ttlMinutes={ttl}"
        ))
        .await
        .expect("server should answer");
        let body = assert_error_response(resp, 400).await;
        assert!(
            body["error"].as_str().unwrap_or_default().contains("ttlMinutes"),
            "ttl {ttl}: {body}"
        );
    }
}

#[tokio::test]
async fn test_blob_deployment_lists_bucket_and_reads_dataset() {
    let harness = TestHarness::new();
    let (bucket, store) = blob_store();
    put_object(&bucket, "app/Datasets/mpeg7/lists.txt", "a.gif\nb.gif\n").await;
    put_object(&bucket, "app/Datasets/mpeg7/classes.txt", "a.gif:x\nb.gif:y\n").await;
    harness.write(
        "uploads/blob.ini",
        "INPUT_FILE_LIST = /app/Datasets/mpeg7/lists.txt\n\
         INPUT_FILE_CLASSES = /app/Datasets/mpeg7/classes.txt\n",
    );
    let base_url = harness.start_server(store).await;

    let body = get_json(&format!("{base_url}/api/directory/list?path=app/Datasets")).await;
    assert_eq!(body["data"]["currentPath"], "app/Datasets");
    assert_eq!(body["data"]["items"][0]["name"], "mpeg7");

    let body = get_json(&format!(
        "{base_url}/line-by-image-name/b.gif?configFile=blob.ini"
    ))
    .await;
    assert_eq!(body["lineNumber"], 2);
}

#[cfg(unix)]
#[tokio::test]
async fn test_upload_then_execute() {
    let (base_url, harness) = start_local().await;
    harness.install_fake_udlf(
        r#"echo "ran $(basename "$1")"
echo "warning" >&2"#,
    );
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new().part(
        "config_file",
        reqwest::multipart::Part::bytes(b"UDL_TASK = UDL\n".to_vec()).file_name("../new.ini"),
    );
    let body: Value = client
        .post(format!("{base_url}/upload-file"))
        .multipart(form)
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["filename"], "new.ini");
    assert!(harness.root().join("uploads/new.ini").exists());

    let body = get_json(&format!("{base_url}/execute/new.ini")).await;
    assert_eq!(body["message"], "Command executed successfully");
    assert_eq!(body["output"], "ran new.ini\n");
    assert_eq!(body["error"], "warning\n");
}

#[cfg(unix)]
#[tokio::test]
async fn test_execute_failure_reports_streams() {
    let (base_url, harness) = start_local().await;
    harness.install_fake_udlf("echo 'invalid UDL_METHOD' >&2; exit 2");

    let resp = reqwest::get(format!("{base_url}/execute/run.ini"))
        .await
        .expect("request");
    let body = assert_error_response(resp, 500).await;
    assert_eq!(body["stderr"], "invalid UDL_METHOD\n");
    assert_eq!(body["exitCode"], 2);

    let resp = reqwest::get(format!("{base_url}/execute/missing.ini"))
        .await
        .expect("request");
    assert_error_response(resp, 404).await;
}

#[tokio::test]
async fn test_upload_without_file_is_bad_request() {
    let (base_url, _harness) = start_local().await;
    let form = reqwest::multipart::Form::new().text("other", "value");
    let resp = reqwest::Client::new()
        .post(format!("{base_url}/upload-file"))
        .multipart(form)
        .send()
        .await
        .expect("request");
    assert_error_response(resp, 400).await;
}
