//! End-to-end tests running real shell scripts through the gateway.

#![cfg(unix)]

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{header, Request, StatusCode};
use bytes::Bytes;
use cgi_gateway::cgi::CgiEnv;
use cgi_gateway::{Gateway, Outcome};

mod common;

use common::{body_string, config_for, get, handle, local_connection, ScriptDir};

#[tokio::test]
async fn test_script_output_becomes_response() {
    let dir = ScriptDir::new("hello");
    dir.script(
        "hello.sh",
        r#"echo "Content-Type: text/plain"
echo "X-Script: yes"
echo
echo "hello world""#,
    );
    let gateway = Gateway::new(config_for(&dir)).unwrap();

    let response = handle(&gateway, get("/cgi-bin/hello.sh")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(response.headers()["x-script"], "yes");
    assert_eq!(body_string(response).await, "hello world\n");
}

#[tokio::test]
async fn test_status_header_sets_response_status() {
    let dir = ScriptDir::new("status");
    dir.script(
        "forbidden.sh",
        r#"printf 'Status: 403 Forbidden\r\nContent-Type: text/html\r\n\r\nno entry'"#,
    );
    let gateway = Gateway::new(config_for(&dir)).unwrap();

    let response = handle(&gateway, get("/cgi-bin/forbidden.sh")).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_string(response).await, "no entry");
}

#[tokio::test]
async fn test_cgi_environment_reaches_script() {
    let dir = ScriptDir::new("env");
    dir.script(
        "files/env.sh",
        r#"echo "Content-Type: text/plain"
echo
echo "method=$REQUEST_METHOD"
echo "query=$QUERY_STRING"
echo "path_info=$PATH_INFO"
echo "script_name=$SCRIPT_NAME"
echo "custom=$HTTP_X_CUSTOM"
echo "remote=$REMOTE_ADDR"
echo "gateway=$GATEWAY_INTERFACE"
echo "home=${HOME:-unset}""#,
    );
    let gateway = Gateway::new(config_for(&dir)).unwrap();

    let request = Request::builder()
        .uri("/cgi-bin/files/env.sh/extra/path?x=1&y=2")
        .header("x-custom", "value")
        .body(Body::empty())
        .unwrap();
    let body = body_string(handle(&gateway, request).await).await;

    assert!(body.contains("method=GET\n"), "{}", body);
    assert!(body.contains("query=x=1&y=2\n"), "{}", body);
    assert!(body.contains("path_info=/extra/path\n"), "{}", body);
    assert!(body.contains("script_name=/files/env.sh\n"), "{}", body);
    assert!(body.contains("custom=value\n"), "{}", body);
    assert!(body.contains("remote=127.0.0.1\n"), "{}", body);
    assert!(body.contains("gateway=CGI/1.1\n"), "{}", body);
    // host environment is not inherited
    assert!(body.contains("home=unset\n"), "{}", body);
}

#[tokio::test]
async fn test_static_and_hook_variables_are_merged() {
    let dir = ScriptDir::new("hook");
    dir.script(
        "vars.sh",
        r#"echo "Content-Type: text/plain"
echo
echo "$STATIC_VAR $HOOK_VAR $REQUEST_METHOD""#,
    );
    let mut config = config_for(&dir);
    config.env.insert("STATIC_VAR".into(), "static".into());
    config.env.insert("HOOK_VAR".into(), "overridden".into());
    let gateway = Gateway::new(config)
        .unwrap()
        .with_env_hook(std::sync::Arc::new(|env: &CgiEnv, _parts: &Parts| {
            let mut vars = std::collections::HashMap::new();
            vars.insert(
                "HOOK_VAR".to_string(),
                format!("hook-{}", env["REQUEST_METHOD"].to_lowercase()),
            );
            vars
        }));

    let body = body_string(handle(&gateway, get("/cgi-bin/vars.sh")).await).await;
    assert_eq!(body, "static hook-get GET\n");
}

#[tokio::test]
async fn test_request_body_is_piped_to_stdin() {
    let dir = ScriptDir::new("post");
    dir.script(
        "echo.sh",
        r#"echo "Content-Type: text/plain"
echo
echo "length=$CONTENT_LENGTH"
cat"#,
    );
    let gateway = Gateway::new(config_for(&dir)).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/cgi-bin/echo.sh")
        .header(header::CONTENT_LENGTH, "11")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("posted data"))
        .unwrap();
    let body = body_string(handle(&gateway, request).await).await;

    assert_eq!(body, "length=11\nposted data");
}

#[tokio::test]
async fn test_output_larger_than_chunk_size_is_streamed_whole() {
    let dir = ScriptDir::new("large");
    dir.script(
        "large.sh",
        r#"echo "Content-Type: text/plain"
echo
i=0
while [ $i -lt 200 ]; do
  echo "line $i"
  i=$((i + 1))
done"#,
    );
    let mut config = config_for(&dir);
    config.response_chunk_size = 7;
    let gateway = Gateway::new(config).unwrap();

    let body = body_string(handle(&gateway, get("/cgi-bin/large.sh")).await).await;

    let expected: String = (0..200).map(|i| format!("line {}\n", i)).collect();
    assert_eq!(body, expected);
}

#[tokio::test]
async fn test_directory_url_runs_index_script() {
    let dir = ScriptDir::new("index");
    dir.script(
        "app/index.sh",
        r#"echo "Content-Type: text/plain"
echo
echo index"#,
    );
    let gateway = Gateway::new(config_for(&dir)).unwrap();

    let body = body_string(handle(&gateway, get("/cgi-bin/app")).await).await;
    assert_eq!(body, "index\n");
}

#[tokio::test]
async fn test_script_without_interpreter_runs_directly() {
    let dir = ScriptDir::new("direct");
    dir.script(
        "direct.cgi",
        r#"echo "Content-Type: text/plain"
echo
echo direct"#,
    );
    let gateway = Gateway::new(config_for(&dir)).unwrap();

    let response = handle(&gateway, get("/cgi-bin/direct.cgi")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "direct\n");
}

#[tokio::test]
async fn test_empty_output_is_no_content() {
    let dir = ScriptDir::new("empty");
    dir.script("quiet.sh", "exit 0");
    let gateway = Gateway::new(config_for(&dir)).unwrap();

    let response = handle(&gateway, get("/cgi-bin/quiet.sh")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(body_string(response).await, "");
}

#[tokio::test]
async fn test_outside_url_path_is_forwarded() {
    let dir = ScriptDir::new("forward");
    let gateway = Gateway::new(config_for(&dir)).unwrap();

    let outcome = gateway.handle(get("/cgi-binary/x.sh"), local_connection()).await;
    assert!(matches!(outcome, Outcome::Forward(_)));
}

#[tokio::test]
async fn test_missing_script_is_not_found() {
    let dir = ScriptDir::new("missing");
    let gateway = Gateway::new(config_for(&dir)).unwrap();

    let response = handle(&gateway, get("/cgi-bin/nope.sh")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(response).await, "Not Found");
}

#[tokio::test]
async fn test_traversal_cannot_escape_base_dir() {
    let dir = ScriptDir::new("traversal");
    let gateway = Gateway::new(config_for(&dir)).unwrap();

    let response = handle(&gateway, get("/cgi-bin/files/..%2f..%2f..%2fbin/sh")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_exec_bit_is_forbidden() {
    let dir = ScriptDir::new("noexec");
    dir.file("plain.cgi", "#!/bin/sh\necho\n", 0o644);
    let mut config = config_for(&dir);
    config.require_exec_bit = true;
    config.debug_output = true;
    let gateway = Gateway::new(config).unwrap();

    let response = handle(&gateway, get("/cgi-bin/plain.cgi")).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_string(response).await;
    assert!(body.starts_with("403: Forbidden\n\n"), "{}", body);
    assert!(body.ends_with("plain.cgi is not executable"), "{}", body);
}

#[tokio::test]
async fn test_content_length_over_cap_is_rejected() {
    let dir = ScriptDir::new("toolarge");
    dir.script("upload.sh", "cat > /dev/null; echo; echo ok");
    let mut config = config_for(&dir);
    config.max_buffer = 16;
    config.request_chunk_size = 16;
    config.response_chunk_size = 16;
    let gateway = Gateway::new(config).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/cgi-bin/upload.sh")
        .header(header::CONTENT_LENGTH, "17")
        .body(Body::from("x".repeat(17)))
        .unwrap();
    let response = handle(&gateway, request).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.headers()[header::CONNECTION], "close");
}

#[tokio::test]
async fn test_streamed_body_over_cap_is_rejected() {
    let dir = ScriptDir::new("streamcap");
    dir.script("upload.sh", "cat > /dev/null; echo; echo ok");
    let mut config = config_for(&dir);
    config.max_buffer = 16;
    config.request_chunk_size = 4;
    config.response_chunk_size = 16;
    let gateway = Gateway::new(config).unwrap();

    let chunks = futures_util::stream::iter(
        (0..4).map(|_| Ok::<_, std::io::Error>(Bytes::from_static(b"0123456789"))),
    );
    let request = Request::builder()
        .method("POST")
        .uri("/cgi-bin/upload.sh")
        .body(Body::from_stream(chunks))
        .unwrap();
    let response = handle(&gateway, request).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_output_over_cap_is_server_error() {
    let dir = ScriptDir::new("outcap");
    dir.script("flood.sh", "head -c 4096 /dev/zero | tr '\\0' 'a'");
    let mut config = config_for(&dir);
    config.max_buffer = 1024;
    config.request_chunk_size = 256;
    config.response_chunk_size = 256;
    let gateway = Gateway::new(config).unwrap();

    let response = handle(&gateway, get("/cgi-bin/flood.sh")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_missing_blank_line_is_server_error() {
    let dir = ScriptDir::new("noblank");
    dir.script("broken.sh", r#"echo "Content-Type: text/plain""#);
    let mut config = config_for(&dir);
    config.debug_output = true;
    let gateway = Gateway::new(config).unwrap();

    let response = handle(&gateway, get("/cgi-bin/broken.sh")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_string(response)
        .await
        .contains("missing end of headers line"));
}

#[tokio::test]
async fn test_unsupported_header_line_is_server_error() {
    let dir = ScriptDir::new("badheader");
    dir.script(
        "bad.sh",
        r#"echo "this is not a header"
echo
echo body"#,
    );
    let gateway = Gateway::new(config_for(&dir)).unwrap();

    let response = handle(&gateway, get("/cgi-bin/bad.sh")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, "Internal Server Error");
}

#[tokio::test]
async fn test_failed_script_reports_stderr_in_debug_mode() {
    let dir = ScriptDir::new("stderr");
    dir.script("fail.sh", "echo 'boom' >&2; exit 3");
    let mut config = config_for(&dir);
    config.debug_output = true;
    let gateway = Gateway::new(config).unwrap();

    let response = handle(&gateway, get("/cgi-bin/fail.sh")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_string(response).await,
        "500: Internal Server Error\n\nboom\n"
    );
}

#[tokio::test]
async fn test_hung_script_times_out() {
    let dir = ScriptDir::new("timeout");
    dir.script("hang.sh", "sleep 30");
    let mut config = config_for(&dir);
    config.request_timeout_ms = 300;
    let gateway = Gateway::new(config).unwrap();

    let started = Instant::now();
    let response = handle(&gateway, get("/cgi-bin/hang.sh")).await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_timeout_response_does_not_wait_for_forced_kill() {
    let dir = ScriptDir::new("stubborn");
    dir.script("stubborn.sh", "trap '' TERM\nwhile true; do sleep 1; done");
    let mut config = config_for(&dir);
    config.request_timeout_ms = 300;
    config.force_kill_delay_ms = 10_000;
    let gateway = Gateway::new(config).unwrap();

    let started = Instant::now();
    let response = handle(&gateway, get("/cgi-bin/stubborn.sh")).await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_custom_status_page() {
    let dir = ScriptDir::new("pages");
    let mut config = config_for(&dir);
    config.status_pages.insert(
        "404".into(),
        cgi_gateway::config::StatusPage {
            content: "<h1>No such script</h1>".into(),
            content_type: "text/html".into(),
        },
    );
    let gateway = Gateway::new(config).unwrap();

    let response = handle(&gateway, get("/cgi-bin/absent.sh")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
    assert_eq!(body_string(response).await, "<h1>No such script</h1>");
}

#[tokio::test]
async fn test_client_disconnect_stops_script() {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let dir = ScriptDir::new("disconnect");
    let pid_file = dir.path().join("script.pid");
    dir.script(
        "linger.sh",
        &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
    );
    let gateway = Gateway::new(config_for(&dir)).unwrap();

    let pending = gateway.handle(get("/cgi-bin/linger.sh"), local_connection());
    assert!(tokio::time::timeout(Duration::from_millis(300), pending)
        .await
        .is_err());

    let pid: i32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    let give_up = Instant::now() + Duration::from_secs(3);
    while kill(Pid::from_raw(pid), None).is_ok() {
        assert!(Instant::now() < give_up, "script {} still running", pid);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_failure_after_head_aborts_body() {
    let dir = ScriptDir::new("late-failure");
    dir.script(
        "partial.sh",
        r#"echo "Content-Type: text/plain"
echo
echo part
sleep 30"#,
    );
    let mut config = config_for(&dir);
    config.request_timeout_ms = 300;
    let gateway = Gateway::new(config).unwrap();

    let response = handle(&gateway, get("/cgi-bin/partial.sh")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await;
    assert!(body.is_err());
}

#[tokio::test]
async fn test_stderr_alone_does_not_fail_request() {
    let dir = ScriptDir::new("warn");
    dir.script(
        "warn.sh",
        r#"echo "deprecated parameter" >&2
echo "Content-Type: text/plain"
echo
echo ok"#,
    );
    let mut config = config_for(&dir);
    config.debug_output = true;
    let gateway = Gateway::new(config).unwrap();

    let response = handle(&gateway, get("/cgi-bin/warn.sh")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok\n");
}
