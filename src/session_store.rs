use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::research::events::ResearchResult;
use crate::research::plan::{QueryComplexity, ResearchPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub query: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<QueryComplexity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ResearchPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionRecord {
    pub fn new(session_id: &str, query: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            query: query.to_string(),
            status: SessionStatus::Running,
            created_at: now,
            updated_at: now,
            complexity: None,
            plan: None,
            result: None,
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != SessionStatus::Running
    }
}

pub const DEFAULT_FINISHED_TTL_SECS: i64 = 3600;
pub const DEFAULT_MAX_FINISHED: usize = 1000;

/// In-memory session records keyed by session id.
///
/// Running sessions are always kept. Finished ones are pruned on insert once
/// they are older than the retention window, and the oldest go first when
/// more than `max_finished` remain.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, SessionRecord>>>,
    finished_ttl: Duration,
    max_finished: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_retention(Duration::seconds(DEFAULT_FINISHED_TTL_SECS), DEFAULT_MAX_FINISHED)
    }
}

impl SessionStore {
    pub fn with_retention(finished_ttl: Duration, max_finished: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            finished_ttl,
            max_finished,
        }
    }

    pub async fn insert(&self, record: SessionRecord) {
        let mut guard = self.inner.write().await;
        self.prune(&mut guard);
        guard.insert(record.session_id.clone(), record);
    }

    fn prune(&self, records: &mut HashMap<String, SessionRecord>) {
        let before = records.len();
        let cutoff = Utc::now() - self.finished_ttl;
        records.retain(|_, record| !record.is_finished() || record.updated_at > cutoff);

        let mut finished: Vec<(DateTime<Utc>, String)> = records
            .values()
            .filter(|record| record.is_finished())
            .map(|record| (record.updated_at, record.session_id.clone()))
            .collect();
        if finished.len() > self.max_finished {
            finished.sort();
            let excess = finished.len() - self.max_finished;
            for (_, session_id) in finished.into_iter().take(excess) {
                records.remove(&session_id);
            }
        }

        let evicted = before - records.len();
        if evicted > 0 {
            debug!(evicted, remaining = records.len(), "Pruned finished sessions");
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        let guard = self.inner.read().await;
        guard.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn set_complexity(&self, session_id: &str, complexity: QueryComplexity) {
        self.modify(session_id, |record| record.complexity = Some(complexity)).await;
    }

    /// Store the latest plan snapshot.
    pub async fn update_plan(&self, session_id: &str, plan: &ResearchPlan) {
        self.modify(session_id, |record| record.plan = Some(plan.clone())).await;
    }

    pub async fn complete(&self, session_id: &str, result: ResearchResult) {
        self.modify(session_id, |record| {
            record.status = SessionStatus::Completed;
            record.plan = Some(result.plan.clone());
            record.result = Some(result);
        })
        .await;
    }

    pub async fn fail(&self, session_id: &str, status: SessionStatus, error: impl Into<String>) {
        let error = error.into();
        self.modify(session_id, |record| {
            record.status = status;
            record.error = Some(error);
        })
        .await;
    }

    async fn modify(&self, session_id: &str, f: impl FnOnce(&mut SessionRecord)) {
        let mut guard = self.inner.write().await;
        if let Some(record) = guard.get_mut(session_id) {
            f(record);
            record.updated_at = Utc::now();
        }
    }
}
