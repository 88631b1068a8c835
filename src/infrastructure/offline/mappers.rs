use super::rows::{AttachmentRow, OfflineInspectionRow};
use crate::domain::entities::{
    EncodedImage, InspectionAnswer, InspectionPayload, OfflineInspectionParts,
    OfflineInspectionRecord, PhotoAttachment, sha256_hex,
};
use crate::domain::value_objects::{
    AnswerResult, FailureKind, GeoTag, OfflineInspectionId, RecordStatus, ServerInspectionId,
};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 画像本体を添付キーに置き換えたペイロード。`payload` 列に JSON で保存する。
#[derive(Debug, Serialize, Deserialize)]
struct StoredPayload {
    checklist_template: Option<String>,
    started_at: i64,
    finished_at: Option<i64>,
    location: Option<GeoTag>,
    answers: Vec<StoredAnswer>,
    evidence_photos: Vec<StoredPhoto>,
    inspector_signature: Option<StoredAssetRef>,
    client_signature: Option<StoredAssetRef>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredAnswer {
    question_key: String,
    result: AnswerResult,
    comment: Option<String>,
    photos: Vec<StoredPhoto>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredPhoto {
    slot_name: String,
    geotag: Option<GeoTag>,
    asset: StoredAssetRef,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredAssetRef {
    key: String,
    sha256: String,
}

/// 分解済みペイロード。マニフェストと添付を別々に書き込む。
pub struct PayloadParts<'a> {
    pub manifest: String,
    pub digest: String,
    pub attachments: Vec<(String, &'a EncodedImage)>,
}

struct AssetCollector<'a> {
    attachments: Vec<(String, &'a EncodedImage)>,
}

impl<'a> AssetCollector<'a> {
    fn add(&mut self, key: String, image: &'a EncodedImage) -> StoredAssetRef {
        let sha256 = image.sha256.clone();
        self.attachments.push((key.clone(), image));
        StoredAssetRef { key, sha256 }
    }

    fn photo(&mut self, key: String, photo: &'a PhotoAttachment) -> StoredPhoto {
        StoredPhoto {
            slot_name: photo.slot_name.clone(),
            geotag: photo.geotag,
            asset: self.add(key, &photo.image),
        }
    }
}

pub fn split_payload(payload: &InspectionPayload) -> Result<PayloadParts<'_>, AppError> {
    let mut assets = AssetCollector {
        attachments: Vec::new(),
    };

    let mut answers = Vec::with_capacity(payload.answers.len());
    for (i, answer) in payload.answers.iter().enumerate() {
        let mut photos = Vec::with_capacity(answer.photos.len());
        for (j, photo) in answer.photos.iter().enumerate() {
            photos.push(assets.photo(format!("answers.{i}.photos.{j}"), photo));
        }
        answers.push(StoredAnswer {
            question_key: answer.question_key.clone(),
            result: answer.result,
            comment: answer.comment.clone(),
            photos,
        });
    }

    let mut evidence_photos = Vec::with_capacity(payload.evidence_photos.len());
    for (j, photo) in payload.evidence_photos.iter().enumerate() {
        evidence_photos.push(assets.photo(format!("evidence.{j}"), photo));
    }

    let inspector_signature = match &payload.inspector_signature {
        Some(image) => Some(assets.add("signature.inspector".to_string(), image)),
        None => None,
    };
    let client_signature = match &payload.client_signature {
        Some(image) => Some(assets.add("signature.client".to_string(), image)),
        None => None,
    };

    let stored = StoredPayload {
        checklist_template: payload.checklist_template.clone(),
        started_at: payload.started_at.timestamp_millis(),
        finished_at: payload.finished_at.map(|at| at.timestamp_millis()),
        location: payload.location,
        answers,
        evidence_photos,
        inspector_signature,
        client_signature,
    };

    let manifest = serde_json::to_string(&stored)?;
    let digest = sha256_hex(manifest.as_bytes());
    Ok(PayloadParts {
        manifest,
        digest,
        attachments: assets.attachments,
    })
}

pub fn attachment_from_row(row: AttachmentRow) -> Result<(String, EncodedImage), AppError> {
    let image = EncodedImage {
        content_type: row.content_type,
        width: to_u32("width", row.width)?,
        height: to_u32("height", row.height)?,
        sha256: row.sha256,
        bytes: row.data,
    };
    Ok((row.attachment_key, image))
}

pub fn assemble_payload(
    manifest: &str,
    mut attachments: HashMap<String, EncodedImage>,
) -> Result<InspectionPayload, AppError> {
    let stored: StoredPayload = serde_json::from_str(manifest)
        .map_err(|err| AppError::DeserializationError(format!("payload manifest: {err}")))?;

    let mut take = |asset: StoredAssetRef| -> Result<EncodedImage, AppError> {
        let image = attachments
            .remove(&asset.key)
            .ok_or_else(|| AppError::Storage(format!("attachment {} is missing", asset.key)))?;
        if image.sha256 != asset.sha256 || !image.verify() {
            return Err(AppError::Storage(format!(
                "attachment {} failed its integrity check",
                asset.key
            )));
        }
        Ok(image)
    };

    let mut answers = Vec::with_capacity(stored.answers.len());
    for answer in stored.answers {
        let mut photos = Vec::with_capacity(answer.photos.len());
        for photo in answer.photos {
            photos.push(PhotoAttachment {
                slot_name: photo.slot_name,
                geotag: photo.geotag,
                image: take(photo.asset)?,
            });
        }
        answers.push(InspectionAnswer {
            question_key: answer.question_key,
            result: answer.result,
            comment: answer.comment,
            photos,
        });
    }

    let mut evidence_photos = Vec::with_capacity(stored.evidence_photos.len());
    for photo in stored.evidence_photos {
        evidence_photos.push(PhotoAttachment {
            slot_name: photo.slot_name,
            geotag: photo.geotag,
            image: take(photo.asset)?,
        });
    }

    let inspector_signature = stored.inspector_signature.map(&mut take).transpose()?;
    let client_signature = stored.client_signature.map(&mut take).transpose()?;

    Ok(InspectionPayload {
        checklist_template: stored.checklist_template,
        started_at: millis_to_datetime("started_at", stored.started_at)?,
        finished_at: stored
            .finished_at
            .map(|ms| millis_to_datetime("finished_at", ms))
            .transpose()?,
        location: stored.location,
        answers,
        evidence_photos,
        inspector_signature,
        client_signature,
    })
}

pub fn record_from_row(
    row: OfflineInspectionRow,
    payload: InspectionPayload,
) -> Result<OfflineInspectionRecord, AppError> {
    let id = OfflineInspectionId::new(row.id).map_err(AppError::DeserializationError)?;
    let server_inspection_id = row
        .server_inspection_id
        .map(ServerInspectionId::new)
        .transpose()
        .map_err(AppError::DeserializationError)?;
    let status = row
        .status
        .parse::<RecordStatus>()
        .map_err(AppError::DeserializationError)?;
    let failure_kind = row
        .failure_kind
        .as_deref()
        .map(str::parse::<FailureKind>)
        .transpose()
        .map_err(AppError::DeserializationError)?;

    Ok(OfflineInspectionRecord::from_parts(OfflineInspectionParts {
        id,
        server_inspection_id,
        line_item_ref: row.line_item_ref,
        inspector_ref: row.inspector_ref,
        status,
        payload,
        created_at: millis_to_datetime("created_at", row.created_at)?,
        updated_at: millis_to_datetime("updated_at", row.updated_at)?,
        synced_at: row
            .synced_at
            .map(|ms| millis_to_datetime("synced_at", ms))
            .transpose()?,
        last_error: row.last_error,
        failure_kind,
        attempt_count: u32::try_from(row.attempt_count).unwrap_or(0),
        last_attempt_at: row
            .last_attempt_at
            .map(|ms| millis_to_datetime("last_attempt_at", ms))
            .transpose()?,
        discard_requested: row.discard_requested,
    }))
}

fn millis_to_datetime(field: &str, millis: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        AppError::DeserializationError(format!("invalid {field} timestamp: {millis}"))
    })
}

fn to_u32(field: &str, value: i64) -> Result<u32, AppError> {
    u32::try_from(value)
        .map_err(|_| AppError::DeserializationError(format!("invalid {field}: {value}")))
}
