//! Shared utilities for gateway integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use axum::body::Body;
use axum::http::{Request, Response};
use cgi_gateway::config::{GatewayConfig, InterpreterConfig};
use cgi_gateway::{ConnectionInfo, Gateway, Outcome};

static DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Throwaway script directory, removed on drop.
pub struct ScriptDir {
    path: PathBuf,
}

impl ScriptDir {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "cgi-gateway-{}-{}-{}",
            name,
            std::process::id(),
            DIR_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a file with the given unix mode.
    pub fn file(&self, relative: &str, content: &str, mode: u32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.path.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    /// Write an executable shell script.
    pub fn script(&self, relative: &str, body: &str) -> PathBuf {
        self.file(relative, &format!("#!/bin/sh\n{}\n", body), 0o755)
    }
}

impl Drop for ScriptDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Gateway settings serving `dir`, running `.sh` files with `/bin/sh`.
pub fn config_for(dir: &ScriptDir) -> GatewayConfig {
    GatewayConfig {
        file_path: dir.path().to_path_buf(),
        extensions: vec![InterpreterConfig::new("/bin/sh", &["sh"])],
        index_extension: "sh".to_string(),
        request_timeout_ms: 5_000,
        force_kill_delay_ms: 200,
        ..GatewayConfig::default()
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn local_connection() -> ConnectionInfo {
    ConnectionInfo::new(
        "127.0.0.1:50000".parse().unwrap(),
        "127.0.0.1:3001".parse().unwrap(),
    )
}

/// Send a request the gateway is expected to handle.
pub async fn handle(gateway: &Gateway, request: Request<Body>) -> Response<Body> {
    match gateway.handle(request, local_connection()).await {
        Outcome::Handled(response) => response,
        Outcome::Forward(request) => panic!("{} was not handled", request.uri()),
    }
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
