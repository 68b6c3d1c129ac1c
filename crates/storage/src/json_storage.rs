//! JSON file storage implementation.
//!
//! Stores data as JSON files under a root directory (`.learnpath` by
//! default). The catalog and enrollments are single files maintained by the
//! authoring and enrollment systems. Each (student, content) pair gets one row
//! file holding the progress row and, for assessments, its attempts; overrides
//! and audit events get one file per student.
//!
//! Transactions are optimistic: the row version read at `begin` is re-checked
//! under the process-wide write lock at `commit`. The new row file is written
//! to a temporary and renamed into place, so a row and its attempts always
//! change together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use learnpath_core::{
    AssessmentAttempt, AuditEvent, ContentId, ContentKind, ContentNode, ContentRef, Enrollment,
    ProgressionOverride, StudentId, StudentProgress, Time, UserId,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::{
    ContentCatalog, EnrollmentDirectory, ProgressStore, ProgressTransaction, Result, StorageError,
};
use crate::memory::sort_course_content;

/// Contents of a row file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RowDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    progress: Option<StudentProgress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attempts: Vec<AssessmentAttempt>,
}

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    catalog: RwLock<Vec<ContentNode>>,
    enrollments: RwLock<Vec<Enrollment>>,
    write_lock: Arc<Mutex<()>>,
}

impl JsonStorage {
    /// Open storage at `root`, creating the directory layout if needed and
    /// loading `catalog.json` and `enrollments.json` when present.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("progress")).await?;
        fs::create_dir_all(root.join("overrides")).await?;
        fs::create_dir_all(root.join("events")).await?;

        let catalog: Vec<ContentNode> = read_json(&root.join("catalog.json"))
            .await?
            .unwrap_or_default();
        let enrollments: Vec<Enrollment> = read_json(&root.join("enrollments.json"))
            .await?
            .unwrap_or_default();

        info!(
            "Opened {} ({} content nodes, {} enrollments)",
            root.display(),
            catalog.len(),
            enrollments.len()
        );

        Ok(Self {
            root,
            catalog: RwLock::new(catalog),
            enrollments: RwLock::new(enrollments),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Insert or replace a catalog node and persist the catalog.
    pub async fn put_node(&self, node: ContentNode) -> Result<()> {
        let mut catalog = self.catalog.write().await;
        let reference = node.reference();
        catalog.retain(|n| n.reference() != reference);
        catalog.push(node);
        write_atomic(&self.root.join("catalog.json"), &*catalog).await
    }

    /// Record an enrollment and persist the directory.
    pub async fn enroll(&self, enrollment: Enrollment) -> Result<()> {
        let mut enrollments = self.enrollments.write().await;
        enrollments.retain(|e| {
            !(e.student_id == enrollment.student_id && e.course_id == enrollment.course_id)
        });
        enrollments.push(enrollment);
        write_atomic(&self.root.join("enrollments.json"), &*enrollments).await
    }

    fn progress_path(&self, student: &StudentId, content: &ContentRef) -> PathBuf {
        progress_path(&self.root, student, content)
    }

    fn overrides_path(&self, student: &StudentId) -> PathBuf {
        self.root
            .join("overrides")
            .join(format!("{}.json", encode_component(student.as_str())))
    }

    fn events_path(&self, student: &StudentId) -> PathBuf {
        self.root
            .join("events")
            .join(format!("{}.json", encode_component(student.as_str())))
    }
}

#[async_trait]
impl ContentCatalog for JsonStorage {
    async fn get_node(&self, node: &ContentRef) -> Result<Option<ContentNode>> {
        let catalog = self.catalog.read().await;
        Ok(catalog.iter().find(|n| &n.reference() == node).cloned())
    }

    async fn list_course_content(&self, course_id: &ContentId) -> Result<Vec<ContentNode>> {
        let catalog = self.catalog.read().await;
        let mut nodes: Vec<ContentNode> = catalog
            .iter()
            .filter(|n| &n.course_id == course_id)
            .cloned()
            .collect();
        sort_course_content(&mut nodes);
        Ok(nodes)
    }

    async fn list_courses(&self) -> Result<Vec<ContentId>> {
        let catalog = self.catalog.read().await;
        let mut courses: Vec<ContentId> = catalog
            .iter()
            .filter(|n| n.kind == ContentKind::Course)
            .map(|n| n.id.clone())
            .collect();
        courses.sort();
        Ok(courses)
    }
}

#[async_trait]
impl EnrollmentDirectory for JsonStorage {
    async fn is_enrolled(&self, student: &StudentId, course: &ContentId) -> Result<bool> {
        let enrollments = self.enrollments.read().await;
        Ok(enrollments
            .iter()
            .any(|e| &e.student_id == student && &e.course_id == course))
    }
}

#[async_trait]
impl ProgressStore for JsonStorage {
    async fn load_progress(
        &self,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<Option<StudentProgress>> {
        let document: Option<RowDocument> = read_json(&self.progress_path(student, content)).await?;
        Ok(document.and_then(|d| d.progress))
    }

    async fn list_progress(
        &self,
        student: &StudentId,
        course: &ContentId,
    ) -> Result<Vec<StudentProgress>> {
        let dir = self
            .root
            .join("progress")
            .join(encode_component(student.as_str()));
        let all: Vec<RowDocument> = list_dir(&dir).await?;
        Ok(all
            .into_iter()
            .filter_map(|d| d.progress)
            .filter(|p| &p.course_id == course)
            .collect())
    }

    async fn list_attempts(
        &self,
        student: &StudentId,
        assessment: &ContentId,
    ) -> Result<Vec<AssessmentAttempt>> {
        let content = ContentRef::assessment(assessment.clone());
        let document: Option<RowDocument> = read_json(&self.progress_path(student, &content)).await?;
        Ok(document.map(|d| d.attempts).unwrap_or_default())
    }

    async fn list_overrides(
        &self,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<Vec<ProgressionOverride>> {
        let all: Vec<ProgressionOverride> = read_json(&self.overrides_path(student))
            .await?
            .unwrap_or_default();
        Ok(all.into_iter().filter(|o| &o.content == content).collect())
    }

    async fn append_override(&self, record: &ProgressionOverride) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.overrides_path(&record.student_id);
        let mut all: Vec<ProgressionOverride> = read_json(&path).await?.unwrap_or_default();
        all.push(record.clone());
        write_atomic(&path, &all).await
    }

    async fn clear_overrides(
        &self,
        student: &StudentId,
        content: &ContentRef,
        cleared_by: &UserId,
        at: Time,
    ) -> Result<Vec<ProgressionOverride>> {
        let _guard = self.write_lock.lock().await;
        let path = self.overrides_path(student);
        let mut all: Vec<ProgressionOverride> = read_json(&path).await?.unwrap_or_default();
        let mut cleared = Vec::new();
        for record in all.iter_mut() {
            if &record.content == content && record.is_active() {
                record.cleared_at = Some(at);
                record.cleared_by = Some(cleared_by.clone());
                cleared.push(record.clone());
            }
        }
        if !cleared.is_empty() {
            write_atomic(&path, &all).await?;
        }
        Ok(cleared)
    }

    async fn append_event(&self, event: &AuditEvent) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.events_path(&event.student_id);
        let mut all: Vec<AuditEvent> = read_json(&path).await?.unwrap_or_default();
        all.push(event.clone());
        write_atomic(&path, &all).await
    }

    async fn list_events(&self, student: &StudentId) -> Result<Vec<AuditEvent>> {
        Ok(read_json(&self.events_path(student)).await?.unwrap_or_default())
    }

    async fn begin(
        &self,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<Box<dyn ProgressTransaction>> {
        let document: RowDocument = read_json(&self.progress_path(student, content))
            .await?
            .unwrap_or_default();

        Ok(Box::new(JsonTransaction {
            root: self.root.clone(),
            write_lock: self.write_lock.clone(),
            student: student.clone(),
            content: content.clone(),
            original: document.progress,
            attempts: document.attempts,
            staged_row: None,
            staged_attempts: Vec::new(),
        }))
    }
}

struct JsonTransaction {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
    student: StudentId,
    content: ContentRef,
    original: Option<StudentProgress>,
    attempts: Vec<AssessmentAttempt>,
    staged_row: Option<StudentProgress>,
    staged_attempts: Vec<AssessmentAttempt>,
}

#[async_trait]
impl ProgressTransaction for JsonTransaction {
    fn progress(&self) -> Option<&StudentProgress> {
        self.original.as_ref()
    }

    fn attempts(&self) -> &[AssessmentAttempt] {
        &self.attempts
    }

    fn put_progress(&mut self, row: StudentProgress) {
        self.staged_row = Some(row);
    }

    fn append_attempt(&mut self, attempt: AssessmentAttempt) {
        self.staged_attempts.push(attempt);
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let _guard = this.write_lock.lock().await;

        let row_path = progress_path(&this.root, &this.student, &this.content);
        let current: RowDocument = read_json(&row_path).await?.unwrap_or_default();
        let expected = this.original.as_ref().map(|r| r.version).unwrap_or(0);
        let stored = current.progress.as_ref().map(|r| r.version).unwrap_or(0);
        if stored != expected {
            return Err(StorageError::Conflict(format!(
                "{} / {} moved from version {} to {}",
                this.student, this.content, expected, stored
            )));
        }
        if this.staged_row.is_none() && this.staged_attempts.is_empty() {
            return Ok(());
        }

        let mut document = current;
        document.attempts.extend(this.staged_attempts);
        if let Some(mut row) = this.staged_row {
            row.version = expected + 1;
            document.progress = Some(row);
        }
        write_atomic(&row_path, &document).await?;

        debug!("Committed {} / {}", this.student, this.content);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn progress_path(root: &Path, student: &StudentId, content: &ContentRef) -> PathBuf {
    root.join("progress")
        .join(encode_component(student.as_str()))
        .join(format!(
            "{}-{}.json",
            content.kind,
            encode_component(content.id.as_str())
        ))
}

/// Make an external id safe to use as a single path component.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

async fn write_temp<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, json.as_bytes()).await?;
    Ok(tmp)
}

async fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let tmp = write_temp(path, value).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(items),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Some(item) = read_json(&entry.path()).await? {
            items.push(item);
        }
    }
    Ok(items)
}
