use crate::domain::entities::EncodedImage;
use crate::shared::error::AppError;
use async_trait::async_trait;

#[async_trait]
pub trait AssetCompressor: Send + Sync {
    /// 長辺が `max_dimension` を超える場合のみ縮小してエンコードする。
    async fn compress(&self, raw: &[u8], max_dimension: u32) -> Result<EncodedImage, AppError>;
}
