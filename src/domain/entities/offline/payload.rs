use super::encoded_image::EncodedImage;
use crate::domain::value_objects::{AnswerResult, GeoTag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoAttachment {
    pub slot_name: String,
    pub geotag: Option<GeoTag>,
    pub image: EncodedImage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionAnswer {
    pub question_key: String,
    pub result: AnswerResult,
    pub comment: Option<String>,
    #[serde(default)]
    pub photos: Vec<PhotoAttachment>,
}

impl InspectionAnswer {
    pub fn new(question_key: impl Into<String>, result: AnswerResult, comment: Option<String>) -> Self {
        Self {
            question_key: question_key.into(),
            result,
            comment,
            photos: Vec::new(),
        }
    }
}

/// 点検の本体。回答・写真・署名・位置情報をまとめて保持する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionPayload {
    pub checklist_template: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub location: Option<GeoTag>,
    #[serde(default)]
    pub answers: Vec<InspectionAnswer>,
    #[serde(default)]
    pub evidence_photos: Vec<PhotoAttachment>,
    pub inspector_signature: Option<EncodedImage>,
    pub client_signature: Option<EncodedImage>,
}

impl InspectionPayload {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            checklist_template: None,
            started_at,
            finished_at: None,
            location: None,
            answers: Vec::new(),
            evidence_photos: Vec::new(),
            inspector_signature: None,
            client_signature: None,
        }
    }

    /// 同じ設問キーの回答は置き換える。既存の写真は引き継ぐ。
    pub fn upsert_answer(&mut self, mut answer: InspectionAnswer) {
        match self
            .answers
            .iter_mut()
            .find(|existing| existing.question_key == answer.question_key)
        {
            Some(existing) => {
                if answer.photos.is_empty() {
                    answer.photos = std::mem::take(&mut existing.photos);
                }
                *existing = answer;
            }
            None => self.answers.push(answer),
        }
    }

    pub fn answer(&self, question_key: &str) -> Option<&InspectionAnswer> {
        self.answers.iter().find(|a| a.question_key == question_key)
    }

    pub fn answer_mut(&mut self, question_key: &str) -> Option<&mut InspectionAnswer> {
        self.answers
            .iter_mut()
            .find(|a| a.question_key == question_key)
    }

    /// 設問キーの重複がないことを確認する。
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for answer in &self.answers {
            if answer.question_key.trim().is_empty() {
                return Err("Question key must not be empty".to_string());
            }
            if !seen.insert(answer.question_key.as_str()) {
                return Err(format!("Duplicate question key: {}", answer.question_key));
            }
        }
        Ok(())
    }

    pub fn photo_count(&self) -> usize {
        self.answers.iter().map(|a| a.photos.len()).sum::<usize>() + self.evidence_photos.len()
    }

    pub fn total_asset_bytes(&self) -> usize {
        let photos = self
            .answers
            .iter()
            .flat_map(|a| a.photos.iter())
            .chain(self.evidence_photos.iter())
            .map(|p| p.image.len());
        let signatures = self
            .inspector_signature
            .iter()
            .chain(self.client_signature.iter())
            .map(EncodedImage::len);
        photos.chain(signatures).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(slot: &str) -> PhotoAttachment {
        PhotoAttachment {
            slot_name: slot.to_string(),
            geotag: None,
            image: EncodedImage::new("image/jpeg", 1, 1, vec![1, 2, 3]),
        }
    }

    #[test]
    fn upsert_replaces_answer_and_keeps_photos() {
        let mut payload = InspectionPayload::new(Utc::now());
        let mut first = InspectionAnswer::new("brakes", AnswerResult::Safe, None);
        first.photos.push(photo("front"));
        payload.upsert_answer(first);

        payload.upsert_answer(InspectionAnswer::new(
            "brakes",
            AnswerResult::NotSafe,
            Some("worn pads".into()),
        ));

        assert_eq!(payload.answers.len(), 1);
        let answer = payload.answer("brakes").unwrap();
        assert_eq!(answer.result, AnswerResult::NotSafe);
        assert_eq!(answer.photos.len(), 1);
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn validate_detects_duplicate_keys() {
        let mut payload = InspectionPayload::new(Utc::now());
        payload
            .answers
            .push(InspectionAnswer::new("a", AnswerResult::Safe, None));
        payload
            .answers
            .push(InspectionAnswer::new("a", AnswerResult::NotApplicable, None));
        assert!(payload.validate().is_err());
    }

    #[test]
    fn counts_assets() {
        let mut payload = InspectionPayload::new(Utc::now());
        let mut answer = InspectionAnswer::new("a", AnswerResult::Safe, None);
        answer.photos.push(photo("1"));
        payload.upsert_answer(answer);
        payload.evidence_photos.push(photo("site"));
        payload.inspector_signature = Some(EncodedImage::new("image/png", 1, 1, vec![9; 10]));

        assert_eq!(payload.photo_count(), 2);
        assert_eq!(payload.total_asset_bytes(), 3 + 3 + 10);
    }
}
