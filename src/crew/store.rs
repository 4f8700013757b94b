//! In-memory crew store
//!
//! Owns every crew record for the life of the process. Each store is an
//! independent instance; the service shares one behind an `Arc`, tests build
//! their own.

use super::models::*;
use super::responder;
use super::trend::{self, Vital};
use crate::error::{DataError, DataResult, Result};
use crate::metrics::METRICS;
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

const CREW_FIXTURE: &str = include_str!("fixtures/crew.json");
const CHAT_FIXTURE: &str = include_str!("fixtures/chat.json");

struct Inner {
    crew: IndexMap<String, CrewMember>,
    chats: HashMap<String, Vec<ChatMessage>>,
    next_task: u64,
    next_query: u64,
}

/// Crew record store
pub struct CrewStore {
    inner: RwLock<Inner>,
}

impl CrewStore {
    /// Create a store over the given records and chat transcripts
    pub fn new(members: Vec<CrewMember>, chats: HashMap<String, Vec<ChatMessage>>) -> Self {
        let crew: IndexMap<String, CrewMember> =
            members.into_iter().map(|m| (m.id.clone(), m)).collect();
        info!("Crew store initialized with {} members", crew.len());

        Self {
            inner: RwLock::new(Inner {
                crew,
                chats,
                next_task: 1,
                next_query: 1,
            }),
        }
    }

    /// Create a store from the bundled fixtures
    pub fn with_fixtures() -> Result<Self> {
        let members: Vec<CrewMember> = serde_json::from_str(CREW_FIXTURE)?;
        let transcripts: HashMap<String, Vec<ChatMessage>> = serde_json::from_str(CHAT_FIXTURE)?;

        let chats = members
            .iter()
            .map(|member| {
                let history = transcripts
                    .get(member.risk_level().as_str())
                    .cloned()
                    .unwrap_or_default();
                (member.id.clone(), history)
            })
            .collect();

        Ok(Self::new(members, chats))
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// All crew members in fixture order
    pub fn list_crew(&self) -> Vec<CrewMember> {
        self.read().crew.values().cloned().collect()
    }

    pub fn get_crew(&self, crew_id: &str) -> Option<CrewMember> {
        self.read().crew.get(crew_id).cloned()
    }

    pub fn contains(&self, crew_id: &str) -> bool {
        self.read().crew.contains_key(crew_id)
    }

    /// Crew members with the anomaly flag set, in fixture order
    pub fn list_anomalies(&self) -> Vec<CrewMember> {
        self.read()
            .crew
            .values()
            .filter(|m| m.is_anomaly())
            .cloned()
            .collect()
    }

    pub fn list_by_risk(&self, level: RiskLevel) -> Vec<CrewMember> {
        self.read()
            .crew
            .values()
            .filter(|m| m.risk_level() == level)
            .cloned()
            .collect()
    }

    /// Number of crew members per risk level, every level present
    pub fn risk_breakdown(&self) -> BTreeMap<RiskLevel, usize> {
        let mut counts: BTreeMap<RiskLevel, usize> =
            RiskLevel::ALL.into_iter().map(|level| (level, 0)).collect();
        for member in self.read().crew.values() {
            *counts.entry(member.risk_level()).or_insert(0) += 1;
        }
        counts
    }

    pub fn tasks(&self, crew_id: &str) -> DataResult<IndexMap<String, Task>> {
        self.read()
            .crew
            .get(crew_id)
            .map(|m| m.tasks.clone())
            .ok_or_else(|| DataError::CrewNotFound(crew_id.to_string()))
    }

    /// Assign a new, incomplete task to a crew member
    pub fn add_task(
        &self,
        crew_id: &str,
        title: &str,
        description: Option<&str>,
    ) -> DataResult<Task> {
        let title = title.trim();
        if title.is_empty() {
            warn!("Rejected task with empty title for {}", crew_id);
            return Err(DataError::EmptyTitle);
        }

        let mut inner = self.write();
        let Inner { crew, next_task, .. } = &mut *inner;
        let member = crew
            .get_mut(crew_id)
            .ok_or_else(|| DataError::CrewNotFound(crew_id.to_string()))?;

        let id = loop {
            let candidate = format!("task-{}", *next_task);
            *next_task += 1;
            if !member.tasks.contains_key(&candidate) {
                break candidate;
            }
        };

        let task = Task {
            id: id.clone(),
            title: title.to_string(),
            description: normalize_description(description),
            completed: false,
        };
        member.tasks.insert(id, task.clone());

        info!("Task {} assigned to {}", task.id, crew_id);
        Ok(task)
    }

    /// Overwrite a task's title, and its description when one is given.
    /// Completion state is left alone.
    pub fn update_task(
        &self,
        crew_id: &str,
        task_id: &str,
        title: &str,
        description: Option<&str>,
    ) -> DataResult<Task> {
        let title = title.trim();
        if title.is_empty() {
            return Err(DataError::EmptyTitle);
        }

        let mut inner = self.write();
        let task = task_mut(&mut inner.crew, crew_id, task_id)?;
        task.title = title.to_string();
        if description.is_some() {
            task.description = normalize_description(description);
        }

        debug!("Task {} updated for {}", task_id, crew_id);
        Ok(task.clone())
    }

    /// Flip completion and return the new value. Two calls cancel out.
    pub fn toggle_task_completion(
        &self,
        crew_id: &str,
        task_id: &str,
    ) -> DataResult<bool> {
        let mut inner = self.write();
        let task = task_mut(&mut inner.crew, crew_id, task_id)?;
        task.completed = !task.completed;

        debug!("Task {} for {} completed={}", task_id, crew_id, task.completed);
        Ok(task.completed)
    }

    pub fn delete_task(&self, crew_id: &str, task_id: &str) -> DataResult<Task> {
        let mut inner = self.write();
        let member = inner
            .crew
            .get_mut(crew_id)
            .ok_or_else(|| DataError::CrewNotFound(crew_id.to_string()))?;

        // shift_remove keeps the remaining tasks in display order
        let task = member
            .tasks
            .shift_remove(task_id)
            .ok_or_else(|| DataError::TaskNotFound {
                crew_id: crew_id.to_string(),
                task_id: task_id.to_string(),
            })?;

        info!("Task {} removed from {}", task_id, crew_id);
        Ok(task)
    }

    /// Record a crew query and answer it immediately
    pub fn add_query(&self, crew_id: &str, message: &str) -> DataResult<Query> {
        let message = message.trim();
        if message.is_empty() {
            return Err(DataError::EmptyMessage);
        }

        let mut inner = self.write();
        let Inner { crew, next_query, .. } = &mut *inner;
        let member = crew
            .get_mut(crew_id)
            .ok_or_else(|| DataError::CrewNotFound(crew_id.to_string()))?;

        let id = loop {
            let candidate = format!("query-{}", *next_query);
            *next_query += 1;
            if !member.queries.contains_key(&candidate) {
                break candidate;
            }
        };

        let now = Utc::now();
        let query = Query {
            id: id.clone(),
            message: message.to_string(),
            timestamp: now,
            response: Some(QueryResponse {
                message: responder::respond(message, &member.profile),
                timestamp: now,
                automated: true,
            }),
        };
        member.queries.insert(id, query.clone());

        let topic = responder::classify(message).map(|t| t.as_str()).unwrap_or("generic");
        METRICS.record_query_answer(topic);
        info!("Query {} from {} answered (topic={})", query.id, crew_id, topic);
        Ok(query)
    }

    pub fn queries(&self, crew_id: &str) -> DataResult<Vec<Query>> {
        self.read()
            .crew
            .get(crew_id)
            .map(|m| m.queries.values().cloned().collect())
            .ok_or_else(|| DataError::CrewNotFound(crew_id.to_string()))
    }

    /// Hourly synthetic series for one vital
    pub fn vital_trend(
        &self,
        crew_id: &str,
        vital: Vital,
    ) -> DataResult<Vec<TrendPoint>> {
        let risk = self
            .read()
            .crew
            .get(crew_id)
            .map(|m| m.risk_level())
            .ok_or_else(|| DataError::CrewNotFound(crew_id.to_string()))?;
        Ok(trend::generate(crew_id, vital, risk))
    }

    /// Chat transcript for a crew member; empty when there is none
    pub fn chat_history(&self, crew_id: &str) -> Vec<ChatMessage> {
        self.read().chats.get(crew_id).cloned().unwrap_or_default()
    }

    /// Append a doctor or astronaut message
    pub fn post_chat_message(
        &self,
        crew_id: &str,
        sender: ChatSender,
        text: &str,
    ) -> DataResult<ChatMessage> {
        if sender == ChatSender::System {
            return Err(DataError::ReservedSender(sender.to_string()));
        }
        self.append_chat(crew_id, sender, text)
    }

    /// Inject a system alert into a crew member's transcript
    pub fn raise_alert(&self, crew_id: &str, text: &str) -> DataResult<ChatMessage> {
        let message = self.append_chat(crew_id, ChatSender::System, text)?;
        warn!("Alert raised for {}: {}", crew_id, message.text);
        Ok(message)
    }

    fn append_chat(
        &self,
        crew_id: &str,
        sender: ChatSender,
        text: &str,
    ) -> DataResult<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DataError::EmptyChatMessage);
        }

        let mut inner = self.write();
        if !inner.crew.contains_key(crew_id) {
            return Err(DataError::CrewNotFound(crew_id.to_string()));
        }

        let history = inner.chats.entry(crew_id.to_string()).or_default();
        let message = ChatMessage {
            id: format!("msg-{:03}", history.len() + 1),
            sender,
            text: text.to_string(),
            timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        history.push(message.clone());

        debug!("Chat message {} from {} for {}", message.id, sender, crew_id);
        Ok(message)
    }
}

fn task_mut<'a>(
    crew: &'a mut IndexMap<String, CrewMember>,
    crew_id: &str,
    task_id: &str,
) -> DataResult<&'a mut Task> {
    crew.get_mut(crew_id)
        .ok_or_else(|| DataError::CrewNotFound(crew_id.to_string()))?
        .tasks
        .get_mut(task_id)
        .ok_or_else(|| DataError::TaskNotFound {
            crew_id: crew_id.to_string(),
            task_id: task_id.to_string(),
        })
}

fn normalize_description(description: Option<&str>) -> Option<String> {
    description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}
