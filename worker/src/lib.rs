use log::{error, info};
use redis::{aio::MultiplexedConnection, AsyncCommands, RedisError, RedisResult};

pub mod config;
pub mod error;
pub mod job;
pub mod manifest;
pub mod options;
pub mod orchestrator;
pub mod profile;
pub mod progress;
pub mod transcoder;

pub use error::{ConfigError, JobError, ResolutionError};
pub use manifest::{JobResult, TaskReport};
pub use options::EncodeSpec;
pub use orchestrator::{BatchOrchestrator, BatchSettings, FailurePolicy};
pub use profile::{resolve, ProfileRequest};
pub use progress::ProgressReporter;
pub use transcoder::{EncodeTask, Encoder, FailureReason, FfmpegEncoder, TaskOutcome, TaskStatus};

// Helper to get hostname or a default
pub fn get_consumer_hostname() -> String {
    hostname::get()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string())
}

pub async fn ensure_consumer_group_exists(
    con: &mut MultiplexedConnection,
    stream_key: &str,
    group_name: &str,
) -> RedisResult<()> {
    // "0" so a new group also sees jobs queued before any worker started.
    let result: Result<(), RedisError> = con
        .xgroup_create_mkstream(stream_key, group_name, "0")
        .await;

    match result {
        Ok(()) => {
            info!(
                "Consumer group '{}' created for stream '{}'",
                group_name, stream_key
            );
            Ok(())
        }
        // BUSYGROUP: the group is already there.
        Err(e) if e.to_string().contains("BUSYGROUP") => {
            info!(
                "Consumer group '{}' already exists for stream '{}'",
                group_name, stream_key
            );
            Ok(())
        }
        Err(e) => {
            error!(
                "Failed to create consumer group '{}' for stream '{}': {}",
                group_name, stream_key, e
            );
            Err(e)
        }
    }
}
