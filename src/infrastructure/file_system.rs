use crate::core::interfaces::FileSystemService;
use crate::utils::{KilnError, Result};
use std::path::Path;
use tokio::fs;

pub struct TokioFileSystemService;

#[async_trait::async_trait]
impl FileSystemService for TokioFileSystemService {
    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).await.map_err(KilnError::Io)
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::write(parent.to_path_buf(), e))?;
        }

        fs::write(path, content)
            .await
            .map_err(|e| KilnError::write(path.to_path_buf(), e))
    }

    async fn create_directory(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| KilnError::write(path.to_path_buf(), e))
    }

    async fn remove_directory(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KilnError::write(path.to_path_buf(), e)),
        }
    }
}
