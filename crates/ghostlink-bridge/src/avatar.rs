use std::future::Future;

use anyhow::Result;
use futures_util::future::BoxFuture;
use ghostlink_types::ids::{AvatarId, ContentUri};
use sha2::{Digest, Sha256};

use crate::connector::LocalIntent;

pub type AvatarFetcher = Box<dyn Fn() -> BoxFuture<'static, Result<Vec<u8>>> + Send + Sync>;

pub enum AvatarSource {
    /// Already uploaded to the local side.
    Prepared { mxc: ContentUri, hash: [u8; 32] },
    /// Downloaded from the remote network only if it is needed.
    Fetch(AvatarFetcher),
}

/// An avatar observed on the remote side. Consumed once by reconciliation.
pub struct Avatar {
    pub id: AvatarId,
    pub source: AvatarSource,
    pub remove: bool,
}

/// Result of [`Avatar::reupload`]. `mxc` is `None` when the content hash
/// matched the current one and nothing was uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reuploaded {
    pub mxc: Option<ContentUri>,
    pub hash: [u8; 32],
}

impl Avatar {
    pub fn prepared(id: impl Into<AvatarId>, mxc: ContentUri, hash: [u8; 32]) -> Self {
        Self {
            id: id.into(),
            source: AvatarSource::Prepared { mxc, hash },
            remove: false,
        }
    }

    pub fn fetch<F, Fut>(id: impl Into<AvatarId>, get: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        Self {
            id: id.into(),
            source: AvatarSource::Fetch(Box::new(move || Box::pin(get()))),
            remove: false,
        }
    }

    pub fn removed(id: impl Into<AvatarId>) -> Self {
        Self {
            id: id.into(),
            source: AvatarSource::Prepared {
                mxc: ContentUri::default(),
                hash: [0u8; 32],
            },
            remove: true,
        }
    }

    pub async fn reupload(&self, intent: &dyn LocalIntent, current_hash: &[u8; 32]) -> Result<Reuploaded> {
        let get = match &self.source {
            AvatarSource::Prepared { mxc, hash } => {
                return Ok(Reuploaded {
                    mxc: Some(mxc.clone()),
                    hash: *hash,
                });
            }
            AvatarSource::Fetch(get) => get,
        };

        let data = get().await?;
        let hash: [u8; 32] = Sha256::digest(&data).into();
        if hash == *current_hash {
            return Ok(Reuploaded { mxc: None, hash });
        }

        let (mime, ext) = detect_mime(&data);
        let file_name = format!("avatar.{ext}");
        let (mxc, _size) = intent.upload_media(data, &file_name, mime).await?;
        Ok(Reuploaded {
            mxc: Some(mxc),
            hash,
        })
    }
}

/// Sniffs the image formats avatars come in.
pub fn detect_mime(data: &[u8]) -> (&'static str, &'static str) {
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        ("image/png", "png")
    } else if data.starts_with(&[0xff, 0xd8, 0xff]) {
        ("image/jpeg", "jpg")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        ("image/gif", "gif")
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        ("image/webp", "webp")
    } else {
        ("application/octet-stream", "bin")
    }
}
