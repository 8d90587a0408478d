//! The two cleanup passes: archive old inbox mail, then purge spam.

use crate::log_sink::LogSink;
use crate::models::{CleanupStatus, ItemOutcome, Label, MessageOp, MessageQuery, MessageRef, OpKind};
use crate::providers::{provider_error_to_message, MailboxApi, ProviderError, PAGE_SIZE};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};

pub const ARCHIVE_AGE_DAYS: i64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub found: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PurgeStage {
    ListSpam,
    DirectDelete,
    ReQuery,
    TrashMove,
    ListTrash,
    FinalDelete,
    Done,
}

/// Tallies of one spam purge.
///
/// `deleted` is the stage-1 count and the only number shown to the user.
/// Whatever the trash fallback removes is tracked in `trashed` and
/// `purged_from_trash` but never added to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpamPurgeReport {
    pub found: usize,
    pub deleted: usize,
    pub remaining: Option<usize>,
    pub trashed: usize,
    pub trash_found: Option<usize>,
    pub purged_from_trash: usize,
    pub stages: Vec<PurgeStage>,
}

impl SpamPurgeReport {
    pub fn reported_count(&self) -> usize {
        self.deleted
    }

    pub fn fallback_ran(&self) -> bool {
        self.stages.contains(&PurgeStage::ReQuery)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupSummary {
    pub archive: Option<ArchiveReport>,
    pub spam: Option<SpamPurgeReport>,
    pub errors: Vec<String>,
}

enum PurgeState {
    ListSpam,
    DirectDelete(Vec<MessageRef>),
    ReQuery,
    TrashMove(Vec<MessageRef>),
    ListTrash,
    FinalDelete(Vec<MessageRef>),
    Done,
}

impl PurgeState {
    fn stage(&self) -> PurgeStage {
        match self {
            PurgeState::ListSpam => PurgeStage::ListSpam,
            PurgeState::DirectDelete(_) => PurgeStage::DirectDelete,
            PurgeState::ReQuery => PurgeStage::ReQuery,
            PurgeState::TrashMove(_) => PurgeStage::TrashMove,
            PurgeState::ListTrash => PurgeStage::ListTrash,
            PurgeState::FinalDelete(_) => PurgeStage::FinalDelete,
            PurgeState::Done => PurgeStage::Done,
        }
    }
}

pub fn archive_query(today: NaiveDate) -> MessageQuery {
    let cutoff = today - Duration::days(ARCHIVE_AGE_DAYS);
    MessageQuery::Search(format!("before:{}", cutoff.format("%Y/%m/%d")))
}

/// Runs both passes. A provider error ends the pass it happened in and is
/// recorded in the summary; the next pass still runs.
pub async fn run_cleanup<A, L>(api: &A, log: &L, today: NaiveDate) -> CleanupSummary
where
    A: MailboxApi,
    L: LogSink + ?Sized,
{
    let mut summary = CleanupSummary::default();

    log.status(CleanupStatus::Archiving);
    match archive_old(api, log, today).await {
        Ok(report) => summary.archive = Some(report),
        Err(err) => {
            let message = provider_error_to_message(&err);
            warn!(?err, "archive pass failed");
            log.log(&format!("❌ Error archiving emails: {message}"));
            summary.errors.push(message);
        }
    }

    log.status(CleanupStatus::PurgingSpam);
    match purge_spam(api, log).await {
        Ok(report) => summary.spam = Some(report),
        Err(err) => {
            let message = provider_error_to_message(&err);
            warn!(?err, "spam pass failed");
            log.log(&format!("❌ Error deleting spam: {message}"));
            summary.errors.push(message);
        }
    }

    summary
}

pub async fn archive_old<A, L>(api: &A, log: &L, today: NaiveDate) -> Result<ArchiveReport, ProviderError>
where
    A: MailboxApi,
    L: LogSink + ?Sized,
{
    log.log(&format!(
        "🔍 Searching for emails older than {ARCHIVE_AGE_DAYS} days..."
    ));
    let messages = api.list_messages(&archive_query(today), PAGE_SIZE).await?;
    if messages.is_empty() {
        log.log("✅ No old emails found.");
        return Ok(ArchiveReport::default());
    }

    let ops: Vec<MessageOp> = messages.iter().map(MessageOp::archive).collect();
    for op in &ops {
        log.log(&format!("📦 Queued email ID: {} for archiving", op.message_id));
    }

    let outcomes = api.execute_batch(&ops).await?;
    let archived = report_outcomes(log, OpKind::Archive, &outcomes);

    log.log(&format!(
        "✅ Archived {} emails older than {ARCHIVE_AGE_DAYS} days.",
        messages.len()
    ));
    Ok(ArchiveReport {
        found: messages.len(),
        failed: outcomes.len().saturating_sub(archived),
    })
}

pub async fn purge_spam<A, L>(api: &A, log: &L) -> Result<SpamPurgeReport, ProviderError>
where
    A: MailboxApi,
    L: LogSink + ?Sized,
{
    let mut report = SpamPurgeReport::default();
    let mut state = PurgeState::ListSpam;

    loop {
        report.stages.push(state.stage());
        debug!(stage = ?state.stage(), "spam purge stage");

        state = match state {
            PurgeState::ListSpam => {
                log.log("🧹 Looking for spam emails to delete...");
                let messages = api.list_messages(&MessageQuery::Label(Label::Spam), PAGE_SIZE).await?;
                report.found = messages.len();
                if messages.is_empty() {
                    log.log("✅ No spam emails found.");
                    PurgeState::Done
                } else {
                    PurgeState::DirectDelete(messages)
                }
            }
            PurgeState::DirectDelete(messages) => {
                let ops: Vec<MessageOp> = messages.iter().map(MessageOp::delete).collect();
                let outcomes = api.execute_batch(&ops).await?;
                report.deleted = report_outcomes(log, OpKind::Delete, &outcomes).min(report.found);
                log.log(&format!(
                    "✅ Processed {} spam emails, successfully deleted {}.",
                    report.found, report.deleted
                ));

                if report.deleted < report.found {
                    log.log("⚠️ Some emails weren't deleted directly. Attempting trash method...");
                    PurgeState::ReQuery
                } else {
                    PurgeState::Done
                }
            }
            PurgeState::ReQuery => {
                let remaining = api.list_messages(&MessageQuery::Label(Label::Spam), PAGE_SIZE).await?;
                report.remaining = Some(remaining.len());
                PurgeState::TrashMove(remaining)
            }
            PurgeState::TrashMove(messages) => {
                if !messages.is_empty() {
                    let ops: Vec<MessageOp> = messages.iter().map(MessageOp::trash).collect();
                    let outcomes = api.execute_batch(&ops).await?;
                    report.trashed = report_outcomes(log, OpKind::Trash, &outcomes);
                }
                PurgeState::ListTrash
            }
            PurgeState::ListTrash => {
                let trashed = api.list_messages(&MessageQuery::Label(Label::Trash), PAGE_SIZE).await?;
                report.trash_found = Some(trashed.len());
                PurgeState::FinalDelete(trashed)
            }
            PurgeState::FinalDelete(messages) => {
                if !messages.is_empty() {
                    let ops: Vec<MessageOp> = messages.iter().map(MessageOp::delete).collect();
                    let outcomes = api.execute_batch(&ops).await?;
                    report.purged_from_trash = report_outcomes(log, OpKind::Delete, &outcomes);
                }
                log.log(&format!(
                    "✅ Final cleanup: {} spam emails deleted.",
                    report.reported_count()
                ));
                PurgeState::Done
            }
            PurgeState::Done => break,
        };
    }

    Ok(report)
}

/// Logs one line per outcome and returns how many succeeded.
fn report_outcomes<L>(log: &L, kind: OpKind, outcomes: &[ItemOutcome]) -> usize
where
    L: LogSink + ?Sized,
{
    outcomes.iter().fold(0, |succeeded, outcome| {
        let id = &outcome.message_id;
        match (&outcome.result, kind) {
            (Ok(()), OpKind::Archive) => succeeded + 1,
            (Ok(()), OpKind::Delete) => {
                log.log(&format!("🗑️ Successfully deleted spam email ID: {id}"));
                succeeded + 1
            }
            (Ok(()), OpKind::Trash) => {
                log.log(&format!("🗑️ Moved spam email ID: {id} to trash"));
                succeeded + 1
            }
            (Err(err), OpKind::Archive) => {
                log.log(&format!("❌ Failed to archive email ID {id}: {}", err.message));
                succeeded
            }
            (Err(err), OpKind::Delete) => {
                log.log(&format!("❌ Failed to delete email ID {id}: {}", err.message));
                succeeded
            }
            (Err(err), OpKind::Trash) => {
                log.log(&format!("❌ Failed to move email ID {id} to trash: {}", err.message));
                succeeded
            }
        }
    })
}
