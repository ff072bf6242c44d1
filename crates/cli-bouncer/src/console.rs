use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use async_trait::async_trait;
use bouncer::chat::{ChannelRef, ChatClient, MessageHandle};
use bouncer::error::ChatError;
use bouncer::temp::unique_name;
use humansize::{format_size, DECIMAL};
use log::info;

/// Chat client that prints to the terminal and "uploads" by copying into a directory
pub struct ConsoleChat {
    out_dir: PathBuf,
    upload_limit: u64,
    next_id: AtomicU64,
}

impl ConsoleChat {
    pub fn new(out_dir: PathBuf, upload_limit: u64) -> Self {
        ConsoleChat {
            out_dir,
            upload_limit,
            next_id: AtomicU64::new(1),
        }
    }

    fn handle(&self, channel: &ChannelRef) -> MessageHandle {
        MessageHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst).to_string(),
            channel: channel.clone(),
            editable: true,
            // printed lines stay printed
            deletable: false,
        }
    }
}

#[async_trait]
impl ChatClient for ConsoleChat {
    async fn send_text(&self, channel: &ChannelRef, text: &str) -> Result<MessageHandle, ChatError> {
        println!("{}", text);
        Ok(self.handle(channel))
    }

    async fn edit_text(&self, message: &MessageHandle, text: &str) -> Result<MessageHandle, ChatError> {
        println!("{}", text);
        Ok(message.clone())
    }

    async fn send_files(&self, _channel: &ChannelRef, paths: &[PathBuf]) -> Result<(), ChatError> {
        for path in paths {
            let size = tokio::fs::metadata(path)
                .await
                .map_err(|e| ChatError::Unavailable(format!("{}: {}", path.display(), e)))?
                .len();
            if size > self.upload_limit {
                return Err(ChatError::Rejected(format!(
                    "exceeds the {} upload limit",
                    format_size(self.upload_limit, DECIMAL)
                )));
            }
        }

        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|e| ChatError::Unavailable(format!("{}: {}", self.out_dir.display(), e)))?;

        for path in paths {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "output.webm".to_string());
            let (_, dest) = unique_name(&file_name, &self.out_dir);
            tokio::fs::copy(path, &dest)
                .await
                .map_err(|e| ChatError::Unavailable(format!("copy to {} failed: {}", dest.display(), e)))?;
            info!("📎 Delivered {}", dest.display());
            println!("📎 {}", dest.display());
        }
        Ok(())
    }

    async fn delete_message(&self, _message: &MessageHandle) -> Result<(), ChatError> {
        Ok(())
    }
}
