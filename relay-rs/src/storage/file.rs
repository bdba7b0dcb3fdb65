use crate::error::{RelayError, Result};
use crate::relay::Saver;
use crate::smtp::envelope::Message;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Writes each message to `<root>/<name>`
///
/// The root is fixed when the saver is created; changing `server.dataPath`
/// takes a restart.
pub struct FileSaver {
    root: PathBuf,
}

impl FileSaver {
    /// Use `root`, creating it (owner-only) when missing
    pub async fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);

        builder.create(&root).await.map_err(|e| {
            RelayError::Storage(format!("Failed to create directory {:?}: {}", root, e))
        })?;

        info!("Persisting messages to {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);

        if valid {
            Ok(self.root.join(name))
        } else {
            Err(RelayError::Storage(format!("Invalid file name: {:?}", name)))
        }
    }
}

#[async_trait]
impl Saver for FileSaver {
    async fn save(&self, message: &Message, name: &str) -> Result<()> {
        let path = self.path_for(name)?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&path).await.map_err(|e| {
            RelayError::Storage(format!("Failed to create {}: {}", path.display(), e))
        })?;

        let written = async {
            let n = tokio::io::copy(&mut message.reader(), &mut file).await?;
            file.flush().await?;
            file.sync_data().await?;
            Ok::<_, std::io::Error>(n)
        }
        .await;

        match written {
            Ok(n) => {
                debug!("Wrote {} bytes to {}", n, path.display());
                Ok(())
            }
            Err(e) => {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&path).await {
                    warn!("Failed to remove partial file {}: {}", path.display(), cleanup);
                }
                Err(RelayError::Storage(format!(
                    "Failed to write {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }
}

/// Unique, sortable name for a new message file
///
/// `20240102T030405.123456Z-1a2b3c4d.eml`: UTC receive time plus a random
/// suffix so two messages in the same microsecond never collide.
pub fn message_file_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}.eml",
        Utc::now().format("%Y%m%dT%H%M%S%.6fZ"),
        &suffix[..8]
    )
}
