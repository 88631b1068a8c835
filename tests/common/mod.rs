#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{ImageBuffer, ImageFormat, Rgb};
use inspection_sync_lib::application::services::OfflineInspectionServiceTrait;
use inspection_sync_lib::domain::entities::OfflineInspectionRecord;
use inspection_sync_lib::domain::value_objects::{AnswerResult, GeoTag};
use inspection_sync_lib::infrastructure::reconciliation::IDEMPOTENCY_HEADER;
use inspection_sync_lib::{AppConfig, AppState};
use wiremock::{Request, Respond, ResponseTemplate};

/// 一時ディレクトリ上のファイルDBと指定サーバーを使う設定。
pub fn test_config(dir: &Path, base_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = format!("sqlite://{}?mode=rwc", dir.join("offline.db").display());
    config.database.max_connections = 2;
    config.sync.auto_sync = false;
    config.sync.submit_timeout_secs = 5;
    config.remote.base_url = base_url.to_string();
    config.remote.request_timeout_secs = 10;
    config
}

pub async fn setup_state(dir: &Path, base_url: &str) -> AppState {
    AppState::new(test_config(dir, base_url))
        .await
        .expect("app state")
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).expect("encode png");
    out.into_inner()
}

/// 回答2件・写真1枚・署名付きの点検を保存する。
pub async fn capture_sample(
    service: &Arc<dyn OfflineInspectionServiceTrait>,
    line_item_ref: i64,
) -> OfflineInspectionRecord {
    let mut session = service.begin_capture(line_item_ref, 7).expect("session");
    session.set_checklist_template("forklift-daily");
    session.set_location(GeoTag::new(35.68, 139.76).unwrap());
    session
        .record_answer("brakes", AnswerResult::Safe, None)
        .unwrap();
    session
        .record_answer("horn", AnswerResult::NotSafe, Some("quiet".into()))
        .unwrap();
    session
        .attach_answer_photo("horn", "front", &png_bytes(64, 48), None)
        .await
        .expect("photo");
    session
        .set_inspector_signature(&png_bytes(32, 16))
        .await
        .expect("signature");

    let captured = session.finish().expect("finish");
    service.save(captured).await.expect("save")
}

/// `Idempotency-Key` ごとに1件だけ登録し、再送には 409 と既存IDを返すサーバー。
pub struct DedupResponder {
    next_id: AtomicI64,
    seen: Mutex<HashMap<String, i64>>,
    first_delay: Option<Duration>,
}

impl DedupResponder {
    pub fn new(first_id: i64) -> Self {
        Self {
            next_id: AtomicI64::new(first_id),
            seen: Mutex::new(HashMap::new()),
            first_delay: None,
        }
    }

    /// 初回の応答だけ遅らせる（応答の喪失を再現する）。
    pub fn delay_first_response(mut self, delay: Duration) -> Self {
        self.first_delay = Some(delay);
        self
    }

    pub fn created(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl Respond for DedupResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some(key) = request
            .headers
            .get(IDEMPOTENCY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
        else {
            return ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({"detail": "missing idempotency key"}));
        };

        let mut seen = self.seen.lock().unwrap();
        if let Some(id) = seen.get(&key) {
            return ResponseTemplate::new(409).set_body_json(serde_json::json!({"id": id}));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        seen.insert(key, id);

        let response = ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": id}));
        match self.first_delay {
            Some(delay) => response.set_delay(delay),
            None => response,
        }
    }
}

/// `Arc` 越しに共有するためのラッパー。
pub struct SharedResponder(pub Arc<DedupResponder>);

impl Respond for SharedResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.0.respond(request)
    }
}
