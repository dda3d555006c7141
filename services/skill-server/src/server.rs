//! Server runtime: subscription, dispatch, worker pool, responses.
//!
//! One dispatcher drains the SUB socket into a bounded internal queue;
//! `N` workers take frames in arrival order, resolve a skill, execute it,
//! and publish the response.  Requests complete in arbitrary order — the
//! fabric makes no ordering promises, callers needing order issue their
//! requests sequentially.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Notify, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use ss_protocol::{ParsedIntent, RequestEnvelope, RequestParseError, ResponseEnvelope};
use ss_skills::{SkillsError, TopicSkills, load_topic};
use ss_transport::{PubSocket, SubSocket, TransportError};

use crate::config::{MatcherMode, ServerConfig};
use crate::executor::execute_skill;
use crate::matcher::{MatchOutcome, Matcher};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("skills: {0}")]
    Skills(#[from] SkillsError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("matcher mode 'external' requires a matcher command")]
    MissingMatcherCommand,
}

// ---------------------------------------------------------------------------
// Bounded dispatch queue
// ---------------------------------------------------------------------------

/// Single-producer multi-consumer queue between the dispatcher and the
/// worker pool.  On overflow the OLDEST undelivered frame is dropped so
/// fresh requests are never starved by a backlog.
struct WorkQueue {
    inner: std::sync::Mutex<VecDeque<(Vec<u8>, Vec<u8>)>>,
    notify: Notify,
    capacity: usize,
}

impl WorkQueue {
    fn new(capacity: usize) -> Self {
        WorkQueue {
            inner: std::sync::Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, item: (Vec<u8>, Vec<u8>)) {
        {
            let mut queue = self.inner.lock().expect("queue lock");
            if queue.len() >= self.capacity {
                queue.pop_front();
                warn!(capacity = self.capacity, "dispatch queue full, oldest frame dropped");
            }
            queue.push_back(item);
        }
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.inner.lock().expect("queue lock").pop_front()
    }

    /// Take the next frame.  During shutdown the queue keeps draining;
    /// `None` only once it is empty and the stop flag is set.
    async fn pop(&self, stop: &mut watch::Receiver<bool>) -> Option<(Vec<u8>, Vec<u8>)> {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if *stop.borrow() {
                return None;
            }
            tokio::select! {
                _ = notified => {}
                changed = stop.changed() => {
                    // A dropped sender counts as a stop request.
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A configured but not yet started skill server.
pub struct SkillServer {
    config: ServerConfig,
    topic_skills: TopicSkills,
    matcher: Matcher,
}

/// A running server; `stop` drains and releases everything.
pub struct ServerHandle {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
    pub_socket: PubSocket,
    grace: std::time::Duration,
}

impl SkillServer {
    /// Load the topic's skills and validate the matcher configuration.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let topic_skills = load_topic(&config.skills_dir, &config.topic, &config.description)?;
        if topic_skills.skills.is_empty() {
            warn!(
                topic = %config.topic,
                dir = %config.skills_dir.display(),
                "no skills found, server will reject every task"
            );
        }

        let matcher = match config.matcher_mode {
            MatcherMode::Single => Matcher::SingleSkill,
            MatcherMode::ExactName => Matcher::ExactName,
            MatcherMode::External => Matcher::External {
                command: config
                    .matcher_command
                    .clone()
                    .ok_or(ServerError::MissingMatcherCommand)?,
            },
        };

        let metadata = serde_json::json!({
            "topic": config.topic,
            "description": config.description,
            "intent_modes": ["explicit", "task-based"],
            "skills": topic_skills
                .skills
                .iter()
                .map(|s| serde_json::json!({"name": s.name, "description": s.description}))
                .collect::<Vec<_>>(),
        });
        info!(metadata = %metadata, "skill server configured");

        Ok(SkillServer {
            config,
            topic_skills,
            matcher,
        })
    }

    /// Subscribe, settle, and launch the dispatcher and worker pool.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let config = self.config;

        let mut sub = SubSocket::connect(&config.proxy_xpub, config.hwm)?;
        sub.subscribe(config.topic.as_bytes());
        info!(topic = %config.topic, "subscribed, waiting for propagation");
        tokio::time::sleep(config.settle_time).await;

        let pub_socket = PubSocket::connect(&config.proxy_xsub, config.hwm)?;

        let (shutdown, _) = watch::channel(false);
        let queue = Arc::new(WorkQueue::new(config.queue_capacity));
        let mut tasks = JoinSet::new();

        // Dispatcher: SUB -> queue.  Owns the SubSocket; dropping it on
        // exit releases the subscription connection.
        {
            let queue = queue.clone();
            let mut stop = shutdown.subscribe();
            tasks.spawn(async move {
                loop {
                    tokio::select! {
                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                break;
                            }
                        }
                        received = sub.recv() => match received {
                            Some(frames) => {
                                let mut frames = frames.into_iter();
                                if let (Some(topic), Some(payload)) = (frames.next(), frames.next()) {
                                    queue.push((topic, payload));
                                }
                            }
                            None => {
                                warn!("subscription socket closed, dispatcher exiting");
                                break;
                            }
                        },
                    }
                }
                debug!("dispatcher stopped");
            });
        }

        let shared = Arc::new(WorkerContext {
            topic_skills: self.topic_skills,
            matcher: self.matcher,
            pub_socket: pub_socket.clone(),
            exec_timeout: config.exec_timeout,
            executor: config.executor.clone(),
        });

        for worker_idx in 0..config.workers.max(1) {
            let queue = queue.clone();
            let shared = shared.clone();
            let mut stop = shutdown.subscribe();
            tasks.spawn(async move {
                while let Some((topic, payload)) = queue.pop(&mut stop).await {
                    handle_request(&shared, worker_idx, &topic, &payload).await;
                }
                debug!(worker_idx, "worker stopped");
            });
        }

        info!(
            topic = %config.topic,
            workers = config.workers.max(1),
            "skill server ready"
        );

        Ok(ServerHandle {
            shutdown,
            tasks,
            pub_socket,
            grace: config.shutdown_grace,
        })
    }
}

impl ServerHandle {
    /// Stop the server: the dispatcher exits within a poll tick, workers
    /// drain the queue inside the grace window and are then force-killed
    /// (an in-flight child process dies with its worker).  Sockets are
    /// released last.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);

        let deadline = Instant::now() + self.grace;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.tasks.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => {
                    warn!("shutdown grace expired, aborting workers");
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        self.pub_socket.close();
        info!("skill server stopped");
    }
}

// ---------------------------------------------------------------------------
// Per-request handling
// ---------------------------------------------------------------------------

struct WorkerContext {
    topic_skills: TopicSkills,
    matcher: Matcher,
    pub_socket: PubSocket,
    exec_timeout: std::time::Duration,
    executor: Option<String>,
}

impl WorkerContext {
    fn publish(&self, reply_to: &str, response: &ResponseEnvelope) {
        match serde_json::to_vec(response) {
            Ok(payload) => {
                self.pub_socket
                    .send(vec![reply_to.as_bytes().to_vec(), payload]);
            }
            Err(e) => warn!(error = %e, "response serialization failed"),
        }
    }
}

async fn handle_request(ctx: &WorkerContext, worker_idx: usize, _topic: &[u8], payload: &[u8]) {
    let payload = String::from_utf8_lossy(payload);

    let request = match RequestEnvelope::parse(&payload) {
        Ok(request) => request,
        Err(RequestParseError::NotJson) => {
            debug!(worker_idx, "non-JSON request payload dropped");
            return;
        }
        Err(RequestParseError::MissingField {
            field,
            request_id,
            reply_to,
        }) => {
            warn!(worker_idx, field, "request missing required field");
            if let Some(reply_to) = reply_to.filter(|r| !r.is_empty()) {
                let response = ResponseEnvelope::failure(
                    request_id.unwrap_or_default(),
                    "malformed request".to_owned(),
                );
                ctx.publish(&reply_to, &response);
            }
            return;
        }
    };

    if request.reply_to.is_empty() {
        // Responses are never published with an empty topic frame.
        warn!(worker_idx, request_id = %request.request_id, "request without reply topic dropped");
        return;
    }

    info!(
        worker_idx,
        request_id = %request.request_id,
        intent = %truncate(&request.intent, 80),
        "processing request"
    );

    let parsed = ParsedIntent::from_intent(&request.intent);
    let skills = &ctx.topic_skills.skills;

    // Single-skill shortcut first, then explicit mode, then the matcher.
    let selected = if skills.len() == 1 {
        Ok(&skills[0])
    } else if let Some(name) = &parsed.skill {
        ctx.topic_skills
            .skill(name)
            .ok_or_else(|| format!("Skill '{}' not found", name))
    } else if let Some(task) = &parsed.task {
        match ctx.matcher.select(task, skills).await {
            MatchOutcome::Skill(name) => ctx
                .topic_skills
                .skill(&name)
                .ok_or_else(|| "No matching skill".to_owned()),
            MatchOutcome::NoMatch => Err("No matching skill".to_owned()),
        }
    } else {
        Err("No matching skill".to_owned())
    };

    let entry = match selected {
        Ok(entry) => entry,
        Err(error) => {
            ctx.publish(
                &request.reply_to,
                &ResponseEnvelope::failure(request.request_id, error),
            );
            return;
        }
    };

    // Progressive disclosure: the full SKILL.md is read only now.
    let detail = match ctx.topic_skills.load_detail(entry) {
        Ok(detail) => detail,
        Err(e) => {
            warn!(skill = %entry.name, error = %e, "SKILL.md load failed");
            ctx.publish(
                &request.reply_to,
                &ResponseEnvelope::failure(
                    request.request_id,
                    format!("Could not load SKILL.md for '{}'", entry.name),
                ),
            );
            return;
        }
    };

    if detail.script_path.is_none() {
        ctx.publish(
            &request.reply_to,
            &ResponseEnvelope::failure(
                request.request_id,
                format!("no runnable for skill {}", detail.name),
            ),
        );
        return;
    }

    let result = execute_skill(
        &detail,
        &parsed.exec_input,
        ctx.exec_timeout,
        ctx.executor.as_deref(),
    )
    .await;

    let response = if result.success {
        ResponseEnvelope::success(request.request_id, result.stdout)
    } else if result.timed_out {
        ResponseEnvelope::failure(request.request_id, result.stderr)
    } else {
        ResponseEnvelope::failure(
            request.request_id,
            format!(
                "Skill execution failed (exit={}): {}",
                result.exit_code, result.stderr
            ),
        )
    };

    debug!(worker_idx, reply_to = %request.reply_to, status = %response.status, "publishing response");
    ctx.publish(&request.reply_to, &response);
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
