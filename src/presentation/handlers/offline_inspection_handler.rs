use crate::application::services::{
    AttemptResult, CaptureSession, DiscardOutcome, OfflineInspectionServiceTrait,
};
use crate::domain::value_objects::{AnswerResult, GeoTag, OfflineInspectionId};
use crate::infrastructure::offline::SyncMetricsSnapshot;
use crate::presentation::dto::Validate;
use crate::presentation::dto::offline_inspection::{
    CaptureManifest, LocationInput, OfflineInspectionSummary, PendingCountResponse, PhotoInput,
    PurgeResponse, RecordActionResponse, SyncPassResponse,
};
use crate::shared::error::AppError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct OfflineInspectionHandler {
    service: Arc<dyn OfflineInspectionServiceTrait>,
}

impl OfflineInspectionHandler {
    pub fn new(service: Arc<dyn OfflineInspectionServiceTrait>) -> Self {
        Self { service }
    }

    /// マニフェストから点検を取り込み、端末に保存する。
    /// 画像パスの相対指定は `base_dir` を起点に解決する。
    pub async fn capture(
        &self,
        manifest: CaptureManifest,
        base_dir: &Path,
    ) -> Result<OfflineInspectionSummary, AppError> {
        manifest.validate().map_err(AppError::ValidationError)?;

        let mut session = self
            .service
            .begin_capture(manifest.line_item, manifest.inspector)?;
        if let Some(template) = &manifest.checklist_template {
            session.set_checklist_template(template.clone());
        }
        if let Some(location) = manifest.location {
            session.set_location(to_geotag(location)?);
        }

        for answer in &manifest.answers {
            let result = answer
                .result
                .parse::<AnswerResult>()
                .map_err(AppError::ValidationError)?;
            session.record_answer(&answer.question_key, result, answer.comment.clone())?;
            for photo in &answer.photos {
                let raw = read_asset(base_dir, &photo.path).await?;
                let geotag = photo_geotag(photo)?;
                session
                    .attach_answer_photo(&answer.question_key, &photo.slot_name, &raw, geotag)
                    .await?;
            }
        }
        for photo in &manifest.evidence_photos {
            let raw = read_asset(base_dir, &photo.path).await?;
            let geotag = photo_geotag(photo)?;
            session
                .add_evidence_photo(&photo.slot_name, &raw, geotag)
                .await?;
        }
        if let Some(path) = &manifest.inspector_signature {
            let raw = read_asset(base_dir, path).await?;
            session.set_inspector_signature(&raw).await?;
        }
        if let Some(path) = &manifest.client_signature {
            let raw = read_asset(base_dir, path).await?;
            session.set_client_signature(&raw).await?;
        }

        self.save_session(&session).await
    }

    async fn save_session(
        &self,
        session: &CaptureSession,
    ) -> Result<OfflineInspectionSummary, AppError> {
        let captured = session.finish()?;
        let record = self.service.save(captured).await?;
        Ok(OfflineInspectionSummary::from(&record))
    }

    pub async fn list(&self) -> Result<Vec<OfflineInspectionSummary>, AppError> {
        let records = self.service.list().await?;
        Ok(records.iter().map(OfflineInspectionSummary::from).collect())
    }

    pub async fn get(&self, id: &str) -> Result<OfflineInspectionSummary, AppError> {
        let id = parse_id(id)?;
        let record = self
            .service
            .get(&id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("offline inspection {id}")))?;
        Ok(OfflineInspectionSummary::from(&record))
    }

    pub fn pending(&self) -> PendingCountResponse {
        PendingCountResponse {
            pending: self.service.pending_count(),
        }
    }

    pub async fn sync(&self) -> Result<SyncPassResponse, AppError> {
        let report = self.service.run_sync_pass().await?;
        Ok(report.into())
    }

    pub async fn retry(&self, id: &str) -> Result<RecordActionResponse, AppError> {
        let id = parse_id(id)?;
        let outcome = match self.service.retry(&id).await? {
            AttemptResult::Synced => "synced".to_string(),
            AttemptResult::Failed(kind) => format!("failed:{}", kind.as_str()),
            AttemptResult::Skipped => "skipped".to_string(),
        };
        let status = self
            .service
            .get(&id)
            .await?
            .map(|record| record.status().as_str().to_string());
        Ok(RecordActionResponse {
            id: id.to_string(),
            outcome,
            status,
        })
    }

    pub async fn discard(&self, id: &str) -> Result<RecordActionResponse, AppError> {
        let id = parse_id(id)?;
        let outcome = match self.service.discard(&id).await? {
            DiscardOutcome::Removed => "removed",
            DiscardOutcome::Deferred => "deferred",
            DiscardOutcome::NotFound => {
                return Err(AppError::NotFound(format!("offline inspection {id}")));
            }
        };
        Ok(RecordActionResponse {
            id: id.to_string(),
            outcome: outcome.to_string(),
            status: None,
        })
    }

    pub async fn purge_synced(&self, older_than_days: u32) -> Result<PurgeResponse, AppError> {
        let removed = self
            .service
            .purge_synced(chrono::Duration::days(i64::from(older_than_days)))
            .await?;
        Ok(PurgeResponse { removed })
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.service.metrics()
    }
}

fn parse_id(id: &str) -> Result<OfflineInspectionId, AppError> {
    OfflineInspectionId::parse(id).map_err(AppError::InvalidInput)
}

fn to_geotag(location: LocationInput) -> Result<GeoTag, AppError> {
    GeoTag::new(location.lat, location.lng).map_err(AppError::ValidationError)
}

fn photo_geotag(photo: &PhotoInput) -> Result<Option<GeoTag>, AppError> {
    photo.location.map(to_geotag).transpose()
}

fn resolve(base_dir: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

async fn read_asset(base_dir: &Path, path: &str) -> Result<Vec<u8>, AppError> {
    let full = resolve(base_dir, path);
    tokio::fs::read(&full)
        .await
        .map_err(|e| AppError::InvalidInput(format!("cannot read {}: {e}", full.display())))
}
