#![allow(dead_code)]

use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dialup::config::{Configuration, EndpointConfig};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Serves `app` on an ephemeral loopback port for the rest of the test.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn config_for(addr: SocketAddr) -> Configuration {
    let mut cfg = Configuration {
        endpoint: EndpointConfig::with_base_url(format!("http://{addr}")),
        ..Configuration::default()
    };
    cfg.upload.timeout = Duration::from_secs(5);
    cfg.generate.timeout = Duration::from_secs(5);
    cfg.validated().unwrap()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 251) as u8, (y % 251) as u8, 90, 255])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn variant(b: f64, c: f64, image_data: Value) -> Value {
    json!({ "settings": { "b": b, "c": c }, "imageData": image_data })
}

/// 3x3 brightness/contrast sweep with the neutral setting in the middle (index 4).
pub fn sweep(tag: &str) -> Value {
    let mut variants = Vec::new();
    for row in 0..3 {
        for col in 0..3 {
            let payload = b64(format!("{tag}-{row}-{col}").as_bytes());
            variants.push(variant(col as f64 / 2.0, row as f64 / 2.0, json!(payload)));
        }
    }
    Value::Array(variants)
}
