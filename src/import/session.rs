use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use super::csv::{parse_rows, ParsedFile};
use super::{fingerprint, ImportEntity, ImportError, ImportReport, ImportRun};
use crate::api::{ApiClient, ApiError, UploadFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Selected,
    Validating,
    Validated,
    Committing,
    Committed,
}

#[derive(Debug, Clone)]
struct SelectedFile {
    name: String,
    bytes: Vec<u8>,
    fingerprint: String,
}

/// An upload in flight. Carries everything needed to check, when the
/// response arrives, that the session still points at the same file.
#[derive(Debug)]
pub struct Pass {
    entity: ImportEntity,
    dry_run: bool,
    file: SelectedFile,
}

impl Pass {
    pub fn endpoint(&self) -> String {
        self.entity.endpoint()
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn upload_file(&self) -> UploadFile {
        UploadFile {
            file_name: self.file.name.clone(),
            bytes: self.file.bytes.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    pub entity: Option<ImportEntity>,
    pub file_name: Option<String>,
    pub fingerprint: Option<String>,
    pub validation: Option<ImportReport>,
    pub commit: Option<ImportReport>,
    pub can_commit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_blocked_by: Option<String>,
}

/// Validate-then-commit state for one import screen.
///
/// Idle → Selected (file chosen) → Validating → Validated (dry-run report)
/// → Committing → Committed. Choosing another file or entity drops back to
/// Selected/Idle and forgets previous reports.
#[derive(Debug)]
pub struct ImportSession {
    entity: Option<ImportEntity>,
    file: Option<SelectedFile>,
    state: SessionState,
    validation: Option<ImportRun>,
    committed: Option<ImportRun>,
}

impl Default for ImportSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportSession {
    pub fn new() -> Self {
        Self {
            entity: None,
            file: None,
            state: SessionState::Idle,
            validation: None,
            committed: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn entity(&self) -> Option<ImportEntity> {
        self.entity
    }

    pub fn validation(&self) -> Option<&ImportRun> {
        self.validation.as_ref()
    }

    pub fn committed(&self) -> Option<&ImportRun> {
        self.committed.as_ref()
    }

    /// Latest run, committed first.
    pub fn latest_run(&self) -> Option<&ImportRun> {
        self.committed.as_ref().or(self.validation.as_ref())
    }

    pub fn select_entity(&mut self, entity: ImportEntity) {
        if self.entity != Some(entity) {
            self.entity = Some(entity);
            self.clear();
        }
    }

    pub fn select_file(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        let fingerprint = fingerprint(&bytes);
        self.validation = None;
        self.committed = None;
        self.file = Some(SelectedFile {
            name: name.into(),
            bytes,
            fingerprint,
        });
        self.state = SessionState::Selected;
    }

    pub fn select_path(&mut self, path: &Path) -> Result<(), ImportError> {
        let bytes = std::fs::read(path).map_err(|e| ImportError::Read {
            path: path.to_string_lossy().to_string(),
            reason: e.to_string(),
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "import.csv".to_string());
        self.select_file(name, bytes);
        Ok(())
    }

    /// Back to Idle, keeping the selected entity.
    pub fn clear(&mut self) {
        self.file = None;
        self.validation = None;
        self.committed = None;
        self.state = SessionState::Idle;
    }

    /// Why a commit is not allowed right now, if it isn't.
    pub fn commit_blocker(&self) -> Option<String> {
        let Some(entity) = self.entity else {
            return Some("no entity selected".into());
        };
        let Some(file) = self.file.as_ref() else {
            return Some("no file selected".into());
        };
        if self.state != SessionState::Validated {
            return Some(format!(
                "session is {:?}, a clean validation is required",
                self.state
            ));
        }
        let Some(run) = self.validation.as_ref() else {
            return Some("file has not been validated".into());
        };
        if !run.dry_run {
            return Some("last pass was not a dry run".into());
        }
        if run.entity != entity {
            return Some(format!(
                "validation was for {}, current entity is {}",
                run.entity.as_str(),
                entity.as_str()
            ));
        }
        if run.fingerprint != file.fingerprint {
            return Some("selected file changed since validation".into());
        }
        if !run.is_clean() {
            return Some(format!("validation reported {} failed rows", run.report.failed));
        }
        None
    }

    pub fn can_commit(&self) -> bool {
        self.commit_blocker().is_none()
    }

    pub fn status(&self) -> SessionStatus {
        let commit_blocked_by = self.commit_blocker();
        SessionStatus {
            state: self.state,
            entity: self.entity,
            file_name: self.file.as_ref().map(|f| f.name.clone()),
            fingerprint: self.file.as_ref().map(|f| f.fingerprint.clone()),
            validation: self.validation.as_ref().map(|r| r.report.clone()),
            commit: self.committed.as_ref().map(|r| r.report.clone()),
            can_commit: commit_blocked_by.is_none(),
            commit_blocked_by,
        }
    }

    pub fn begin_validate(&mut self) -> Result<Pass, ImportError> {
        self.ensure_idle_for_pass()?;
        let entity = self.entity.ok_or(ImportError::NoEntity)?;
        let file = self.file.clone().ok_or(ImportError::NoFile)?;
        self.validation = None;
        self.committed = None;
        self.state = SessionState::Validating;
        Ok(Pass {
            entity,
            dry_run: true,
            file,
        })
    }

    /// Checked before any commit call is issued.
    pub fn begin_commit(&mut self) -> Result<Pass, ImportError> {
        self.ensure_idle_for_pass()?;
        if let Some(reason) = self.commit_blocker() {
            warn!(reason = %reason, "import commit rejected");
            return Err(ImportError::CommitRejected(reason));
        }
        let entity = self.entity.ok_or(ImportError::NoEntity)?;
        let file = self.file.clone().ok_or(ImportError::NoFile)?;
        self.state = SessionState::Committing;
        Ok(Pass {
            entity,
            dry_run: false,
            file,
        })
    }

    fn ensure_idle_for_pass(&self) -> Result<(), ImportError> {
        match self.state {
            SessionState::Validating | SessionState::Committing => Err(ImportError::Busy),
            _ => Ok(()),
        }
    }

    /// Applies an upload response to the session.
    pub fn finish(
        &mut self,
        pass: Pass,
        response: Result<ImportReport, ApiError>,
    ) -> Result<ImportRun, ImportError> {
        let still_current = self.entity == Some(pass.entity)
            && self
                .file
                .as_ref()
                .map(|f| f.fingerprint == pass.file.fingerprint)
                .unwrap_or(false);
        if !still_current {
            return Err(ImportError::Protocol(
                "file or entity changed while the upload was running".into(),
            ));
        }

        let fallback = if pass.dry_run {
            SessionState::Selected
        } else {
            SessionState::Validated
        };
        let report = match response {
            Ok(report) => report,
            Err(e) => {
                self.state = fallback;
                return Err(e.into());
            }
        };
        if report.dry_run != pass.dry_run {
            self.state = fallback;
            return Err(ImportError::Protocol(format!(
                "dryRun echoed as {}, requested {}",
                report.dry_run, pass.dry_run
            )));
        }
        if !report.entity.eq_ignore_ascii_case(pass.entity.as_str()) {
            self.state = fallback;
            return Err(ImportError::Protocol(format!(
                "entity echoed as {}, requested {}",
                report.entity,
                pass.entity.as_str()
            )));
        }

        let parsed: ParsedFile = parse_rows(&String::from_utf8_lossy(&pass.file.bytes));
        let run = ImportRun::new(
            pass.entity,
            pass.file.name,
            pass.file.fingerprint,
            parsed,
            report,
        );
        info!(
            entity = run.entity.as_str(),
            dry_run = run.dry_run,
            total = run.report.total,
            created = run.report.created,
            updated = run.report.updated,
            skipped = run.report.skipped,
            failed = run.report.failed,
            "import pass finished"
        );
        if pass.dry_run {
            self.validation = Some(run.clone());
            self.state = SessionState::Validated;
        } else {
            self.committed = Some(run.clone());
            self.state = SessionState::Committed;
        }
        Ok(run)
    }

    pub async fn validate(&mut self, api: &dyn ApiClient) -> Result<ImportRun, ImportError> {
        let pass = self.begin_validate()?;
        let response = api
            .upload(&pass.endpoint(), &pass.upload_file(), true)
            .await;
        self.finish(pass, response)
    }

    pub async fn commit(&mut self, api: &dyn ApiClient) -> Result<ImportRun, ImportError> {
        let pass = self.begin_commit()?;
        let response = api
            .upload(&pass.endpoint(), &pass.upload_file(), false)
            .await;
        self.finish(pass, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_report(entity: ImportEntity, dry_run: bool) -> ImportReport {
        let mut r = ImportReport::new(entity, dry_run);
        r.record(crate::import::RowStatus::Created);
        r
    }

    fn validated_session() -> ImportSession {
        let mut s = ImportSession::new();
        s.select_entity(ImportEntity::Students);
        s.select_file("a.csv", b"student_no,last_name\n1,A\n".to_vec());
        let pass = s.begin_validate().expect("begin validate");
        s.finish(pass, Ok(clean_report(ImportEntity::Students, true)))
            .expect("finish validate");
        s
    }

    #[test]
    fn commit_requires_validation() {
        let mut s = ImportSession::new();
        s.select_entity(ImportEntity::Students);
        s.select_file("a.csv", b"x\n".to_vec());
        assert!(matches!(
            s.begin_commit(),
            Err(ImportError::CommitRejected(_))
        ));
        assert_eq!(s.state(), SessionState::Selected);
    }

    #[test]
    fn clean_validation_unlocks_commit() {
        let mut s = validated_session();
        assert!(s.can_commit());
        let pass = s.begin_commit().expect("begin commit");
        assert!(!pass.dry_run());
        s.finish(pass, Ok(clean_report(ImportEntity::Students, false)))
            .expect("finish commit");
        assert_eq!(s.state(), SessionState::Committed);
        assert!(!s.can_commit());
    }

    #[test]
    fn entity_change_resets_to_idle() {
        let mut s = validated_session();
        s.select_entity(ImportEntity::Enrollments);
        assert_eq!(s.state(), SessionState::Idle);
        assert!(s.validation().is_none());
        assert!(matches!(s.begin_commit(), Err(ImportError::CommitRejected(_))));
    }

    #[test]
    fn reselecting_a_file_drops_the_validation() {
        let mut s = validated_session();
        s.select_file("a.csv", b"student_no,last_name\n1,A\n".to_vec());
        assert_eq!(s.state(), SessionState::Selected);
        assert!(!s.can_commit());
    }

    #[test]
    fn failed_rows_block_commit() {
        let mut s = ImportSession::new();
        s.select_entity(ImportEntity::Students);
        s.select_file("a.csv", b"student_no,last_name\n1,\n".to_vec());
        let pass = s.begin_validate().expect("begin validate");
        let mut report = ImportReport::new(ImportEntity::Students, true);
        report.record_failure(2, "missing last_name", None);
        s.finish(pass, Ok(report)).expect("finish validate");
        let reason = s.commit_blocker().expect("blocked");
        assert!(reason.contains("1 failed rows"));
    }

    #[test]
    fn dry_run_echo_mismatch_is_a_protocol_error() {
        let mut s = ImportSession::new();
        s.select_entity(ImportEntity::Students);
        s.select_file("a.csv", b"x\n".to_vec());
        let pass = s.begin_validate().expect("begin validate");
        let err = s
            .finish(pass, Ok(clean_report(ImportEntity::Students, false)))
            .expect_err("mismatch");
        assert!(matches!(err, ImportError::Protocol(_)));
        assert_eq!(s.state(), SessionState::Selected);
        assert!(!s.can_commit());
    }

    #[test]
    fn response_for_a_replaced_file_is_discarded() {
        let mut s = ImportSession::new();
        s.select_entity(ImportEntity::Students);
        s.select_file("a.csv", b"one\n".to_vec());
        let pass = s.begin_validate().expect("begin validate");
        s.select_file("b.csv", b"two\n".to_vec());
        assert!(s
            .finish(pass, Ok(clean_report(ImportEntity::Students, true)))
            .is_err());
        assert!(s.validation().is_none());
        assert_eq!(s.state(), SessionState::Selected);
    }

    #[test]
    fn second_pass_while_busy_is_refused() {
        let mut s = ImportSession::new();
        s.select_entity(ImportEntity::Students);
        s.select_file("a.csv", b"x\n".to_vec());
        let _pass = s.begin_validate().expect("begin validate");
        assert!(matches!(s.begin_validate(), Err(ImportError::Busy)));
    }
}
