use crate::application::ports::AssetCompressor;
use crate::domain::entities::{
    CapturedInspection, EncodedImage, InspectionAnswer, InspectionPayload, PhotoAttachment,
    now_millis,
};
use crate::domain::value_objects::{AnswerResult, GeoTag, OfflineInspectionId};
use crate::shared::error::AppError;
use std::sync::Arc;

/// 点検入力中のセッション。
///
/// 開始時にIDを採番し、以後変更しない。画像の圧縮に失敗しても
/// その操作だけが失敗し、セッションはそのまま使い続けられる。
pub struct CaptureSession {
    id: OfflineInspectionId,
    line_item_ref: i64,
    inspector_ref: i64,
    payload: InspectionPayload,
    compressor: Arc<dyn AssetCompressor>,
    max_dimension: u32,
}

impl CaptureSession {
    pub fn begin(
        line_item_ref: i64,
        inspector_ref: i64,
        compressor: Arc<dyn AssetCompressor>,
        max_dimension: u32,
    ) -> Result<Self, AppError> {
        if line_item_ref <= 0 {
            return Err(AppError::ValidationError(format!(
                "line item reference must be positive, got {line_item_ref}"
            )));
        }
        if inspector_ref <= 0 {
            return Err(AppError::ValidationError(format!(
                "inspector reference must be positive, got {inspector_ref}"
            )));
        }

        let id = OfflineInspectionId::generate();
        tracing::debug!(
            target: "offline::capture",
            id = %id,
            line_item_ref,
            inspector_ref,
            "capture session started"
        );

        Ok(Self {
            id,
            line_item_ref,
            inspector_ref,
            payload: InspectionPayload::new(now_millis()),
            compressor,
            max_dimension,
        })
    }

    pub fn id(&self) -> &OfflineInspectionId {
        &self.id
    }

    pub fn payload(&self) -> &InspectionPayload {
        &self.payload
    }

    pub fn set_checklist_template(&mut self, template: impl Into<String>) {
        let template = template.into();
        self.payload.checklist_template = if template.trim().is_empty() {
            None
        } else {
            Some(template)
        };
    }

    pub fn set_location(&mut self, location: GeoTag) {
        self.payload.location = Some(location);
    }

    /// 同じ設問キーで再度記録した場合は前の回答を置き換える。
    pub fn record_answer(
        &mut self,
        question_key: &str,
        result: AnswerResult,
        comment: Option<String>,
    ) -> Result<(), AppError> {
        let key = require_non_empty("question key", question_key)?;
        let comment = comment.filter(|c| !c.trim().is_empty());
        self.payload
            .upsert_answer(InspectionAnswer::new(key, result, comment));
        Ok(())
    }

    pub async fn attach_answer_photo(
        &mut self,
        question_key: &str,
        slot_name: &str,
        raw: &[u8],
        geotag: Option<GeoTag>,
    ) -> Result<(), AppError> {
        let slot_name = require_non_empty("slot name", slot_name)?;
        if self.payload.answer(question_key).is_none() {
            return Err(AppError::NotFound(format!(
                "no answer recorded for question {question_key}"
            )));
        }

        let image = self.compress(raw).await?;
        let answer = self
            .payload
            .answer_mut(question_key)
            .ok_or_else(|| AppError::NotFound(format!("question {question_key}")))?;
        answer.photos.push(PhotoAttachment {
            slot_name,
            geotag,
            image,
        });
        Ok(())
    }

    pub async fn add_evidence_photo(
        &mut self,
        slot_name: &str,
        raw: &[u8],
        geotag: Option<GeoTag>,
    ) -> Result<(), AppError> {
        let slot_name = require_non_empty("slot name", slot_name)?;
        let image = self.compress(raw).await?;
        self.payload.evidence_photos.push(PhotoAttachment {
            slot_name,
            geotag,
            image,
        });
        Ok(())
    }

    pub async fn set_inspector_signature(&mut self, raw: &[u8]) -> Result<(), AppError> {
        let image = self.compress(raw).await?;
        self.payload.inspector_signature = Some(image);
        Ok(())
    }

    pub async fn set_client_signature(&mut self, raw: &[u8]) -> Result<(), AppError> {
        let image = self.compress(raw).await?;
        self.payload.client_signature = Some(image);
        Ok(())
    }

    /// 入力を確定する。回答が1件もない場合はエラーで、セッションは継続できる。
    pub fn finish(&self) -> Result<CapturedInspection, AppError> {
        if self.payload.answers.is_empty() {
            return Err(AppError::ValidationError(
                "an inspection needs at least one answer".to_string(),
            ));
        }
        self.payload.validate().map_err(AppError::ValidationError)?;

        let finished_at = now_millis();
        let mut payload = self.payload.clone();
        payload.finished_at = Some(finished_at);

        tracing::info!(
            target: "offline::capture",
            id = %self.id,
            answers = payload.answers.len(),
            photos = payload.photo_count(),
            asset_bytes = payload.total_asset_bytes(),
            "capture finished"
        );

        Ok(CapturedInspection {
            id: self.id.clone(),
            line_item_ref: self.line_item_ref,
            inspector_ref: self.inspector_ref,
            payload,
            captured_at: finished_at,
        })
    }

    async fn compress(&self, raw: &[u8]) -> Result<EncodedImage, AppError> {
        self.compressor
            .compress(raw, self.max_dimension)
            .await
            .inspect_err(|err| {
                tracing::warn!(
                    target: "offline::capture",
                    id = %self.id,
                    error = %err,
                    "asset compression failed"
                );
            })
    }
}

fn require_non_empty(label: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::ValidationError(format!("{label} must not be empty")));
    }
    Ok(trimmed.to_string())
}
