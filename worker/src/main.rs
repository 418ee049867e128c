// worker/src/main.rs
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, error, info, warn};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use tokio::signal;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::sleep;
use uuid::Uuid;

use encode_worker::config::WorkerConfig;
use encode_worker::job::{
    parse_job_from_map, progress_fields, Job, JobReply, ENCODE_JOB_STREAM_KEY,
    ENCODE_PROGRESS_STREAM_KEY, ENCODE_RESULT_STREAM_KEY, JOB_CONSUMER_GROUP,
};
use encode_worker::manifest::{ErrorResponse, JobResponse};
use encode_worker::progress::{ChannelReporter, LogReporter, ProgressEvent};
use encode_worker::{ensure_consumer_group_exists, get_consumer_hostname, BatchOrchestrator};

const WORKER_LOOP_DELAY_MS: u64 = 1000;
const STREAM_BLOCK_TIMEOUT_MS: usize = 5000;

/// Publishes progress events for one job until the batch drops its sender.
async fn forward_progress(
    mut con: MultiplexedConnection,
    job_id: String,
    mut rx: UnboundedReceiver<ProgressEvent>,
) {
    while let Some(event) = rx.recv().await {
        let fields = match progress_fields(&job_id, &event) {
            Ok(fields) => fields,
            Err(e) => {
                warn!("[Job {}] {}", job_id, e);
                continue;
            }
        };
        let published: RedisResult<String> = con
            .xadd(ENCODE_PROGRESS_STREAM_KEY, "*", fields.as_slice())
            .await;
        if let Err(e) = published {
            warn!("[Job {}] Failed to publish progress event: {}", job_id, e);
        }
    }
}

async fn process_single_job(
    con: &MultiplexedConnection,
    config: &WorkerConfig,
    job: Job, // Take ownership of job
) -> Result<JobReply, String> {
    let job_id = job.payload.job_id.clone();
    let input_path = config.input_path(&job.payload.input_path);
    let output_dir = PathBuf::from(&job.payload.output_dir);
    let profiles = job.payload.requested_profiles();
    info!(
        "[Job {}] Processing. Input: {:?}, Output dir: {:?}, Profiles: {}",
        job_id,
        input_path,
        output_dir,
        profiles.len()
    );
    debug!("[Job {}] Profiles: {:?}", job_id, profiles);

    let (tx, rx) = mpsc::unbounded_channel();
    let forwarder = tokio::spawn(forward_progress(con.clone(), job_id.clone(), rx));

    // Encodes block, so the whole batch runs off the async runtime.
    let orchestrator = BatchOrchestrator::with_settings(config.encoder(), config.batch_settings());
    let reporter = (LogReporter::new(job_id.clone()), ChannelReporter::new(tx));
    let batch_result = tokio::task::spawn_blocking(move || {
        orchestrator.run_batch(&input_path, &output_dir, &profiles, &reporter)
    })
    .await;

    if let Err(e) = forwarder.await {
        warn!("[Job {}] Progress forwarder ended abnormally: {}", job_id, e);
    }

    match batch_result {
        Ok(Ok(result)) => {
            let response = JobResponse::from_result(&result);
            info!("[Job {}] {}", job_id, response.message);
            Ok(JobReply::Completed(response))
        }
        Ok(Err(job_err)) => {
            error!("[Job {}] Rejected: {}", job_id, job_err);
            Ok(JobReply::Rejected(ErrorResponse::from(&job_err)))
        }
        Err(join_err) => {
            // spawn_blocking task itself failed (e.g., panic)
            let msg = format!(
                "[Job {}] Batch task failed (panic/cancellation): {}",
                job_id, join_err
            );
            error!("{}", msg);
            Err(msg)
        }
    }
}

async fn publish_reply(
    con: &mut MultiplexedConnection,
    job_id: &str,
    reply: &JobReply,
) -> Result<(), String> {
    let fields = reply.result_fields(job_id)?;
    let published: RedisResult<String> = con
        .xadd(ENCODE_RESULT_STREAM_KEY, "*", fields.as_slice())
        .await;
    published
        .map(|entry_id| {
            info!(
                "[Job {}] Published result (status {}) as {}",
                job_id,
                reply.status_code(),
                entry_id
            )
        })
        .map_err(|e| format!("[Job {}] Failed to publish result: {}", job_id, e))
}

async fn jobs_processing_loop(
    mut valkey_con: MultiplexedConnection,
    config: &WorkerConfig,
    stream_key: &str,
    group_name: &str,
    consumer_name: &str,
) {
    info!(
        "Worker '{}' starting to process jobs from stream '{}', group '{}'",
        consumer_name, stream_key, group_name
    );

    loop {
        let read_opts = StreamReadOptions::default()
            .group(group_name, consumer_name)
            .count(1)
            .block(STREAM_BLOCK_TIMEOUT_MS);

        let result: RedisResult<Option<StreamReadReply>> = valkey_con
            .xread_options(&[stream_key], &[">"], &read_opts)
            .await;

        match result {
            Ok(Some(reply)) => {
                if reply.keys.is_empty() {
                    debug!("No new messages for consumer '{}', continuing.", consumer_name);
                    continue;
                }

                for stream_key_entry in reply.keys {
                    for message_entry in stream_key_entry.ids {
                        let job = match parse_job_from_map(message_entry.id.clone(), message_entry.map) {
                            Ok(j) => j,
                            Err(e) => {
                                error!(
                                    "Failed to parse job (Valkey ID: {}): {}. Skipping.",
                                    message_entry.id, e
                                );
                                continue;
                            }
                        };

                        let job_id_for_ack = job.payload.job_id.clone();
                        let message_id_for_ack = job.message_id.clone();

                        let outcome = match process_single_job(&valkey_con, config, job).await {
                            Ok(reply) => publish_reply(&mut valkey_con, &job_id_for_ack, &reply).await,
                            Err(e) => Err(e),
                        };

                        match outcome {
                            Ok(()) => {
                                match valkey_con
                                    .xack::<_, _, _, i64>(stream_key, group_name, &[&message_id_for_ack])
                                    .await
                                {
                                    Ok(acked_count) if acked_count > 0 => info!(
                                        "[Job {}] Successfully ACKed Valkey message_id: {}",
                                        job_id_for_ack, message_id_for_ack
                                    ),
                                    Ok(_) => warn!(
                                        "[Job {}] ACK command for Valkey message_id {} returned 0 or unexpected count.",
                                        job_id_for_ack, message_id_for_ack
                                    ),
                                    Err(e) => error!(
                                        "[Job {}] Failed to ACK Valkey message_id {}: {}",
                                        job_id_for_ack, message_id_for_ack, e
                                    ),
                                }
                            }
                            Err(processing_err_msg) => {
                                // Left in the PEL for retry or manual handling.
                                error!(
                                    "[Job {}] Failed to process: {}. Valkey message {} will NOT be ACKed.",
                                    job_id_for_ack, processing_err_msg, message_id_for_ack
                                );
                            }
                        }
                    }
                }
            }
            Ok(None) => {
                debug!(
                    "No messages received for consumer '{}' within timeout, re-checking.",
                    consumer_name
                );
            }
            Err(e) => {
                error!(
                    "Error reading from Valkey stream '{}': {}. Retrying after delay.",
                    stream_key, e
                );
                sleep(Duration::from_millis(WORKER_LOOP_DELAY_MS)).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = WorkerConfig::from_env().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;
    let consumer_id = Uuid::new_v4().to_string();
    let hostname = get_consumer_hostname();
    let consumer_name = format!("worker-{}-{}", hostname, consumer_id);

    info!("Starting worker with consumer name: {}", consumer_name);
    info!(
        "Encoder: '{}', timeout: {:?}, max parallel: {}, failure policy: {:?}",
        config.encoder_command, config.encode_timeout, config.max_parallel, config.failure_policy
    );

    info!("Connecting to Valkey at: {}", config.valkey_url);
    let valkey_client = redis::Client::open(config.valkey_url.as_str())?;
    let mut valkey_con_for_group_check = valkey_client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| {
            error!("Failed to connect to Valkey: {}", e);
            e
        })?;
    info!("Successfully connected to Valkey.");

    if let Err(e) = ensure_consumer_group_exists(
        &mut valkey_con_for_group_check,
        ENCODE_JOB_STREAM_KEY,
        JOB_CONSUMER_GROUP,
    )
    .await
    {
        error!("Could not ensure consumer group exists: {}. Exiting.", e);
        return Err(e.into());
    }

    let valkey_con_for_loop = valkey_client.get_multiplexed_async_connection().await?;

    tokio::select! {
        _ = jobs_processing_loop(valkey_con_for_loop, &config, ENCODE_JOB_STREAM_KEY, JOB_CONSUMER_GROUP, &consumer_name) => {
            error!("Job processing loop exited unexpectedly.");
        }
        _ = signal::ctrl_c() => {
            info!("CTRL-C received, shutting down worker '{}'.", consumer_name);
        }
    }

    info!("Worker {} finished.", consumer_name);
    Ok(())
}
