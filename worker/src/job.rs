use crate::manifest::{ErrorResponse, JobResponse};
use crate::progress::ProgressEvent;
use crate::profile::{LadderSelection, ProfileRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const ENCODE_JOB_STREAM_KEY: &str = "encode_jobs";
pub const ENCODE_PROGRESS_STREAM_KEY: &str = "encode_progress";
pub const ENCODE_RESULT_STREAM_KEY: &str = "encode_results";
pub const JOB_CONSUMER_GROUP: &str = "encode_workers_group";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JobPayload {
    pub job_id: String,
    pub input_path: String,
    pub output_dir: String,
    pub profiles: Vec<ProfileRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ladder: Option<LadderSelection>,
}

impl JobPayload {
    /// Explicit profiles followed by the rungs of the ladder selection, if any.
    pub fn requested_profiles(&self) -> Vec<ProfileRequest> {
        let mut profiles = self.profiles.clone();
        if let Some(ladder) = &self.ladder {
            profiles.extend(ladder.expand());
        }
        profiles
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub message_id: String, // Valkey message ID
    pub payload: JobPayload,
}

/// Reads a required string field of a stream entry.
fn string_field(fields: &HashMap<String, redis::Value>, name: &str) -> Result<String, String> {
    let value = fields
        .get(name)
        .ok_or_else(|| format!("Missing {} field", name))?;
    redis::from_redis_value(value).map_err(|e| format!("Failed to parse {}: {}", name, e))
}

pub fn parse_job_from_map(
    message_id: String,
    fields: HashMap<String, redis::Value>,
) -> Result<Job, String> {
    let job_id = string_field(&fields, "job_id")?;
    let input_path = string_field(&fields, "input_path")?;
    let output_dir = string_field(&fields, "output_dir")?;

    let profiles_json = string_field(&fields, "profiles_json")?;
    let profiles: Vec<ProfileRequest> = serde_json::from_str(&profiles_json)
        .map_err(|e| format!("Failed to deserialize profiles from JSON: {}", e))?;

    let ladder = match fields.get("ladder_json") {
        Some(_) => {
            let ladder_json = string_field(&fields, "ladder_json")?;
            let ladder: LadderSelection = serde_json::from_str(&ladder_json)
                .map_err(|e| format!("Failed to deserialize ladder from JSON: {}", e))?;
            Some(ladder)
        }
        None => None,
    };

    Ok(Job {
        message_id,
        payload: JobPayload {
            job_id,
            input_path,
            output_dir,
            profiles,
            ladder,
        },
    })
}

/// Field/value pairs for one `encode_progress` entry.
pub fn progress_fields(job_id: &str, event: &ProgressEvent) -> Result<Vec<(&'static str, String)>, String> {
    let event_json = serde_json::to_string(event)
        .map_err(|e| format!("Failed to serialize progress event: {}", e))?;
    Ok(vec![("job_id", job_id.to_string()), ("event_json", event_json)])
}

/// Final outcome of a job as published on `encode_results`.
#[derive(Debug, Clone)]
pub enum JobReply {
    Completed(JobResponse),
    Rejected(ErrorResponse),
}

impl JobReply {
    pub fn status_code(&self) -> u16 {
        match self {
            JobReply::Completed(response) => response.status_code(),
            JobReply::Rejected(error) => error.status_code,
        }
    }

    /// Field/value pairs for one `encode_results` entry.
    pub fn result_fields(&self, job_id: &str) -> Result<Vec<(&'static str, String)>, String> {
        let body_json = match self {
            JobReply::Completed(response) => serde_json::to_string(response),
            JobReply::Rejected(error) => serde_json::to_string(error),
        }
        .map_err(|e| format!("Failed to serialize job reply: {}", e))?;
        Ok(vec![
            ("job_id", job_id.to_string()),
            ("status_code", self.status_code().to_string()),
            ("body_json", body_json),
        ])
    }
}
